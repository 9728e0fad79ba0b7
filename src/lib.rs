// SPDX-License-Identifier: GPL-3.0-or-later

pub mod challenge;
pub mod config;
pub mod connection_limit;
pub mod handler;
pub mod http;
pub mod identity;
pub mod metrics;
pub mod presence;
pub mod protocol;
pub mod rate_limit;
pub mod rooms;
pub mod typed_data;

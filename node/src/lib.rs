// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod api;
pub mod clock;
pub mod config;
pub mod errors;
pub mod fanout;
pub mod faults;
pub mod gateway;
pub mod health;
pub mod log;
pub mod pipeline;
pub mod sample;
pub mod server;
pub mod shutdown;
pub mod store;
pub mod telemetry;
pub mod worker;

//! Realtime subsystem scenario tests.

mod broadcast_tests;
mod http_tests;
mod presence_tests;
mod rate_limit_tests;
mod recovery_tests;

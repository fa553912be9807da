mod utils;

mod coordinator_test;
mod discovery_test;
mod execution_test;

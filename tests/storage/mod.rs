mod engine_tests;
mod request_tests;
mod routing_tests;
mod wire_tests;

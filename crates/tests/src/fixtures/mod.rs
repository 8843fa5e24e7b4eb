pub mod gateway;
pub mod records;
pub mod test_engine;

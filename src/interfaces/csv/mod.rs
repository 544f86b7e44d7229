pub mod deposit_reader;
pub mod summary_writer;

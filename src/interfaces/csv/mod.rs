pub mod mapping_reader;

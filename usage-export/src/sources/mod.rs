pub mod export_file;

pub use export_file::ExportFileSource;

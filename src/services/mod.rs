pub mod commands;
pub mod filesystem;

pub(crate) use commands::CommandService;
pub(crate) use filesystem::FilesystemService;

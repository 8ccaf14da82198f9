pub mod all;
pub mod init;
pub mod list;
pub mod plan;
pub mod run;

pub mod check;
pub mod init;
pub mod programs;
pub mod run;

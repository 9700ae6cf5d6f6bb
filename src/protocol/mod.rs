// Protocol: serial text commands in, acknowledgement lines out.
pub mod parser;
pub mod response;

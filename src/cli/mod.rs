//! 无头调用层：参数构建、进程执行、流解码、响应归一化

pub mod args;
pub mod decoder;
pub mod executor;
pub mod response;

pub use args::{build_args, CliRequest, InputFormat, OutputFormat};
pub use decoder::{LineDecoder, MessageStream};
pub use executor::{ChunkStream, ExecOptions, ExecOutput, ProcessExecutor};
pub use response::{
    reconcile, reconcile_messages, JsonResponse, Response, StreamJsonResponse, TextResponse,
};

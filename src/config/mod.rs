mod curl;
mod loader;
mod parse;
mod template;
mod types;


pub use curl::{parse_curl_command, parse_curl_file};
pub use loader::{finalize, load_file};
pub use template::TemplateEngine;
pub use types::{
    AdvancedOptions, ApiConfig, Config, DurationValue, ExtractorKind, ExtractorSpec, GrpcOptions,
    HttpOptions, Operator, VerifyConfig, VerifyKind, WebsocketOptions,
};

pub(crate) use parse::parse_header_arg;

//! 核心层：错误类型、生成登记表（取消与过期清理）

pub mod error;
pub mod registry;

pub use error::{HandlerError, PipelineError};
pub use registry::{GenerationId, GenerationRegistry, GenerationSnapshot, GenerationStatus};

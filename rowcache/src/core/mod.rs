pub mod error;
pub mod expression;
pub mod fingerprint;
pub mod types;

pub use error::{CacheError, Result};
pub use expression::{BinaryOp, ConstantValue, Expression, ExpressionHandle, UnaryOp};
pub use fingerprint::KeyDeriver;
pub use types::{
    CachePayload, CachedPayload, FingerprintKey, PersistentRecord, ResultEnvelope,
    ResultShapeKind, StoredContent,
};

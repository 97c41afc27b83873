pub mod encoding;
pub mod equivalence;
pub mod identity;
pub mod record;

pub use encoding::Encoding;
pub use equivalence::FormatEquivalence;
pub use identity::ContentIdentity;
pub use record::{DecodeError, FieldProblem, FieldReader, RawRecord};

//! Message codec: framing disciplines and the EXI binary transform.
//!
//! Contract: `decode(bytes) -> zero or more complete messages plus
//! buffered leftover`, `encode(message) -> bytes`. The framing mode and
//! the EXI transform are both switchable mid-session, always at a
//! message boundary on the session's single processing pipeline.

mod exi;
mod framing;

pub use exi::{ExiParameters, ExiSchemaMode, ExiTransform, EXI_MAGIC};
pub use framing::{FramingMode, NetconfCodec, EOM_MARKER};

pub mod assembler;
pub mod filter;

pub use assembler::{AssemblerUpdate, SegmentAssembler};
pub use filter::{AnnotationFilter, BracketAnnotationFilter};

/// meshx core library - triangle mesh storage and interchange
///
/// This library provides an in-memory triangle soup with affine transforms
/// and volume analysis, a binary/ASCII STL codec and an OBJ serializer.
/// B-rep shapes enter through the [`Tessellator`] trait.

pub mod error;
pub mod geometry;
pub mod obj;
pub mod stl;
pub mod tessellate;
pub mod transform;

// Re-export commonly used types
pub use error::{FormatError, MeshError, MeshResult, ParseError, TypeMismatch};
pub use geometry::{Mesh, Triangle};
pub use obj::{read_obj, write_obj, ObjOptions};
pub use stl::{load_stl, read_stl, write_stl, StlFormat, StlMode, StlWriteOptions};
pub use tessellate::{export_obj, export_stl, ExportOptions, MultiShape, Tessellator};
pub use transform::Transform;

/// Product name written into STL headers and OBJ comments.
pub const PRODUCT_NAME: &str = env!("CARGO_PKG_NAME");

/// Product version written into STL headers and OBJ comments.
pub const PRODUCT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Product URL written into OBJ comments.
pub const PRODUCT_URL: &str = env!("CARGO_PKG_HOMEPAGE");

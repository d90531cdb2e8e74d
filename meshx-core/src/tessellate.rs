/// Bridge from an external B-rep tessellation service to STL/OBJ files
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{MeshError, MeshResult};
use crate::geometry::{Mesh, Triangle};
use crate::obj::ObjOptions;
use crate::stl::{self, StlFormat, StlWriteOptions};

/// A service that turns a shape into a triangle soup.
///
/// `factor` controls meshing density (higher is finer). With
/// `use_min_dimension` the service bases its deflection on the smallest
/// extent of the shape, which suits high aspect ratio parts.
pub trait Tessellator {
    type Shape;

    fn tessellate(
        &self,
        shape: &Self::Shape,
        factor: f64,
        use_min_dimension: bool,
    ) -> MeshResult<Vec<Triangle>>;
}

/// How several shapes map onto STL files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MultiShape {
    /// `<stem>_<i>.<ext>` per shape.
    #[default]
    OneShapePerFile,
    /// A single file: one solid per shape for ASCII, one joined mesh for binary.
    AllShapesInOneFile,
}

/// Conversion settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportOptions {
    /// Uniform scale applied about the origin.
    pub scale: f64,
    pub factor: f64,
    pub use_min_dimension: bool,
    pub format: StlFormat,
    pub multi_shape: MultiShape,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            scale: 1.0,
            factor: 4000.0,
            use_min_dimension: false,
            format: StlFormat::Ascii,
            multi_shape: MultiShape::OneShapePerFile,
        }
    }
}

fn shape_mesh<T: Tessellator>(
    tessellator: &T,
    shape: &T::Shape,
    name: &str,
    options: &ExportOptions,
) -> MeshResult<Mesh> {
    let soup = tessellator.tessellate(shape, options.factor, options.use_min_dimension)?;
    let mut mesh = Mesh::from_triangles(name, soup);
    mesh.scale(options.scale, options.scale, options.scale);
    debug!(shape = name, triangles = mesh.len(), "tessellated shape");
    Ok(mesh)
}

fn part_path(path: &Path, index: usize) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut name = format!("{stem}_{index}");
    if let Some(ext) = path.extension() {
        name.push('.');
        name.push_str(&ext.to_string_lossy());
    }
    path.with_file_name(name)
}

fn part_name(path: &Path, index: usize) -> String {
    part_path(path, index)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Tessellate shapes and write them as STL.
///
/// Returns the files written.
///
/// # Errors
///
/// [`MeshError::NoShapes`] for an empty slice, otherwise any tessellation or
/// write error. Files already written are left in place.
pub fn export_stl<T: Tessellator>(
    tessellator: &T,
    shapes: &[T::Shape],
    path: impl AsRef<Path>,
    options: &ExportOptions,
) -> MeshResult<Vec<PathBuf>> {
    let path = path.as_ref();
    let write_options = StlWriteOptions {
        format: options.format,
        update_normals: true,
    };
    info!(shapes = shapes.len(), path = %path.display(), "exporting STL");

    match (shapes, options.multi_shape) {
        ([], _) => Err(MeshError::NoShapes),
        ([shape], _) => {
            let mut mesh = shape_mesh(tessellator, shape, "", options)?;
            mesh.save_stl(path, &write_options)?;
            Ok(vec![path.to_path_buf()])
        }
        (shapes, MultiShape::OneShapePerFile) => shapes
            .iter()
            .enumerate()
            .map(|(i, shape)| -> MeshResult<PathBuf> {
                let target = part_path(path, i);
                let mut mesh = shape_mesh(tessellator, shape, "", options)?;
                mesh.save_stl(&target, &write_options)?;
                Ok(target)
            })
            .collect(),
        (shapes, MultiShape::AllShapesInOneFile) => {
            let mut meshes = shapes
                .iter()
                .enumerate()
                .map(|(i, shape)| shape_mesh(tessellator, shape, &part_name(path, i), options))
                .collect::<MeshResult<Vec<Mesh>>>()?;

            match options.format {
                StlFormat::Ascii => {
                    let mut writer = BufWriter::new(File::create(path)?);
                    for mesh in &mut meshes {
                        mesh.update_normals();
                        stl::write_ascii(mesh, &mut writer, mesh.name())?;
                    }
                    writer.flush()?;
                }
                StlFormat::Binary => {
                    let mut joined = Mesh::new();
                    for mesh in &meshes {
                        joined.join(mesh);
                    }
                    joined.save_stl(path, &write_options)?;
                }
            }
            Ok(vec![path.to_path_buf()])
        }
    }
}

/// Tessellate shapes, join them in order and write one OBJ file.
///
/// # Errors
///
/// [`MeshError::NoShapes`] for an empty slice, otherwise any tessellation or
/// write error.
pub fn export_obj<T: Tessellator>(
    tessellator: &T,
    shapes: &[T::Shape],
    path: impl AsRef<Path>,
    options: &ExportOptions,
    obj_options: &ObjOptions,
) -> MeshResult<()> {
    if shapes.is_empty() {
        return Err(MeshError::NoShapes);
    }

    let mut joined = Mesh::new();
    for shape in shapes {
        joined.join(&shape_mesh(tessellator, shape, "", options)?);
    }
    joined.save_obj(path, obj_options)
}

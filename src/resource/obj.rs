//! Minimal Wavefront OBJ reader for the static meshes placed next to the animated grid.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use cgmath::{InnerSpace, Vector3, Zero};

use crate::error::Error;
use crate::render::mesh::StaticVertex;

pub struct ObjMesh {
    pub vertices: Vec<StaticVertex>,
    pub indices: Vec<u32>,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct Corner {
    position: usize,
    tex_coord: Option<usize>,
}

pub fn load_obj(path: &Path) -> anyhow::Result<ObjMesh> {
    log::debug!("Loading obj mesh {}", path.display());

    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    parse_obj(&source).with_context(|| format!("Failed to load {}", path.display()))
}

pub fn parse_obj(source: &str) -> Result<ObjMesh, Error> {
    let mut positions: Vec<[f32; 3]> = Vec::new();
    let mut tex_coords: Vec<[f32; 2]> = Vec::new();

    let mut corners: HashMap<Corner, u32> = HashMap::new();
    let mut vertices: Vec<StaticVertex> = Vec::new();
    let mut indices: Vec<u32> = Vec::new();

    for (line_index, line) in source.lines().enumerate() {
        let line_number = line_index + 1;
        let line = line.split('#').next().unwrap_or_default();
        let mut fields = line.split_whitespace();

        match fields.next() {
            Some("v") => positions.push(parse_floats(fields, line_number)?),
            Some("vt") => {
                let [s, t, _]: [f32; 3] = parse_floats(fields.chain(["0"]), line_number)?;
                tex_coords.push([s, t]);
            }
            Some("f") => {
                let mut face = Vec::new();
                for field in fields {
                    let corner =
                        parse_corner(field, positions.len(), tex_coords.len(), line_number)?;
                    let index = match corners.get(&corner) {
                        Some(index) => *index,
                        None => {
                            let index = vertices.len() as u32;
                            vertices.push(StaticVertex {
                                position: positions[corner.position],
                                normal: [0.0; 3],
                                tex_coord: corner
                                    .tex_coord
                                    .map(|tex_coord| tex_coords[tex_coord])
                                    .unwrap_or_default(),
                            });
                            corners.insert(corner, index);
                            index
                        }
                    };
                    face.push(index);
                }

                if face.len() < 3 {
                    return Err(Error::Parse {
                        line: line_number,
                        message: format!("a face needs three corners, found {}", face.len()),
                    });
                }

                // fan around the first corner
                for window in 1..face.len() - 1 {
                    indices.extend_from_slice(&[face[0], face[window], face[window + 1]]);
                }
            }
            _ => {}
        }
    }

    accumulate_normals(&mut vertices, &indices);

    log::debug!(
        "Parsed obj mesh with {} vertices and {} triangles",
        vertices.len(),
        indices.len() / 3
    );

    Ok(ObjMesh { vertices, indices })
}

fn parse_floats<'a, const N: usize>(
    fields: impl Iterator<Item = &'a str>,
    line: usize,
) -> Result<[f32; N], Error> {
    let mut values = [0.0; N];
    let mut fields = fields;

    for value in values.iter_mut() {
        let field = fields.next().ok_or_else(|| Error::Parse {
            line,
            message: format!("expected {N} numbers"),
        })?;
        *value = field.parse().map_err(|_| Error::Parse {
            line,
            message: format!("expected a number, found '{field}'"),
        })?;
    }

    Ok(values)
}

/// Resolves one `v`, `v/vt`, `v//vn` or `v/vt/vn` corner. Negative indices count back
/// from the end of the list read so far.
fn parse_corner(
    field: &str,
    position_count: usize,
    tex_coord_count: usize,
    line: usize,
) -> Result<Corner, Error> {
    let mut parts = field.split('/');

    let position = resolve_index(parts.next(), position_count, line)?.ok_or_else(|| {
        Error::Parse {
            line,
            message: format!("face corner '{field}' has no position"),
        }
    })?;
    let tex_coord = resolve_index(parts.next(), tex_coord_count, line)?;

    Ok(Corner {
        position,
        tex_coord,
    })
}

fn resolve_index(part: Option<&str>, count: usize, line: usize) -> Result<Option<usize>, Error> {
    let part = match part {
        Some(part) if !part.is_empty() => part,
        _ => return Ok(None),
    };

    let index: i64 = part.parse().map_err(|_| Error::Parse {
        line,
        message: format!("expected an index, found '{part}'"),
    })?;

    let resolved = match index {
        0 => None,
        index if index > 0 => Some(index as usize - 1),
        index => count.checked_sub(index.unsigned_abs() as usize),
    };

    match resolved {
        Some(resolved) if resolved < count => Ok(Some(resolved)),
        _ => Err(Error::Parse {
            line,
            message: format!("index {index} is outside the {count} entries read so far"),
        }),
    }
}

fn accumulate_normals(vertices: &mut [StaticVertex], indices: &[u32]) {
    let mut normals = vec![Vector3::<f32>::zero(); vertices.len()];

    for triangle in indices.chunks_exact(3) {
        let [v0, v1, v2] = [triangle[0], triangle[1], triangle[2]]
            .map(|index| Vector3::from(vertices[index as usize].position));
        let normal = (v1 - v0).cross(v2 - v0);
        for index in triangle {
            normals[*index as usize] += normal;
        }
    }

    for (vertex, normal) in vertices.iter_mut().zip(normals) {
        if normal.magnitude2() > 0.0 {
            vertex.normal = normal.normalize().into();
        }
    }
}

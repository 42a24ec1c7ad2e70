use cgmath::{InnerSpace, Rotation, Vector3, Zero};

use crate::animation::{quaternion_from_xyz, Bone, Skeleton};
use crate::error::Error;
use crate::render::mesh::SkinnedVertex;
use crate::resource::md5::tokenizer::Tokenizer;

pub const MAX_WEIGHTS_PER_VERTEX: usize = 4;

pub struct Md5SubMesh {
    /// Texture path exactly as written after `shader`.
    pub texture: String,
    pub vertices: Vec<SkinnedVertex>,
    pub indices: Vec<u32>,
}

pub struct Md5Model {
    pub skeleton: Skeleton,
    pub meshes: Vec<Md5SubMesh>,
}

struct RawVertex {
    line: usize,
    tex_coord: [f32; 2],
    start_weight: usize,
    weight_count: usize,
}

struct RawWeight {
    line: usize,
    joint: usize,
    bias: f32,
    position: [f32; 3],
}

#[derive(Default)]
struct RawSubMesh {
    texture: String,
    vertices: Vec<RawVertex>,
    triangles: Vec<(usize, [u32; 3])>,
    weights: Vec<RawWeight>,
}

pub fn parse_mesh(source: &str) -> Result<Md5Model, Error> {
    let mut tokenizer = Tokenizer::new(source);

    let mut declared_joints: Option<usize> = None;
    let mut declared_meshes: Option<usize> = None;
    let mut bones: Vec<Bone> = Vec::new();
    let mut raw_meshes: Vec<RawSubMesh> = Vec::new();

    while let Some(token) = tokenizer.peek() {
        tokenizer.next_token()?;
        match token {
            "MD5Version" => {
                tokenizer.parse::<i32>("a version")?;
            }
            "commandline" => {
                tokenizer.quoted()?;
            }
            "numJoints" => declared_joints = Some(tokenizer.parse("a joint count")?),
            "numMeshes" => declared_meshes = Some(tokenizer.parse("a mesh count")?),
            "joints" => bones = parse_joints(&mut tokenizer)?,
            "mesh" => raw_meshes.push(parse_sub_mesh(&mut tokenizer)?),
            other => {
                return Err(tokenizer.error(format!("unexpected token '{other}'")));
            }
        }
    }

    if let Some(declared) = declared_joints {
        if declared != bones.len() {
            return Err(Error::ContractViolation(format!(
                "numJoints is {declared} but {} joints were read",
                bones.len()
            )));
        }
    }
    if let Some(declared) = declared_meshes {
        if declared != raw_meshes.len() {
            return Err(Error::ContractViolation(format!(
                "numMeshes is {declared} but {} meshes were read",
                raw_meshes.len()
            )));
        }
    }

    let skeleton = Skeleton::new(bones)?;

    let meshes = raw_meshes
        .into_iter()
        .map(|raw_mesh| build_sub_mesh(raw_mesh, &skeleton))
        .collect::<Result<Vec<_>, Error>>()?;

    log::debug!(
        "Parsed md5 mesh with {} bones and {} sub-meshes",
        skeleton.bone_count(),
        meshes.len()
    );

    Ok(Md5Model { skeleton, meshes })
}

fn parse_joints(tokenizer: &mut Tokenizer) -> Result<Vec<Bone>, Error> {
    let mut bones = Vec::new();

    tokenizer.expect("{")?;
    while tokenizer.peek() != Some("}") {
        let name = tokenizer.quoted()?;
        let parent: i32 = tokenizer.parse("a parent index")?;
        let position = tokenizer.vector3()?;
        let orientation = tokenizer.vector3()?;

        bones.push(Bone::new(
            name,
            usize::try_from(parent).ok(),
            position.into(),
            quaternion_from_xyz(orientation[0], orientation[1], orientation[2]),
        ));
    }
    tokenizer.expect("}")?;

    Ok(bones)
}

fn parse_sub_mesh(tokenizer: &mut Tokenizer) -> Result<RawSubMesh, Error> {
    let mut raw_mesh = RawSubMesh::default();

    tokenizer.expect("{")?;
    loop {
        let line = tokenizer.line();
        match tokenizer.next_token()? {
            "}" => break,
            "shader" => raw_mesh.texture = tokenizer.quoted()?,
            "numverts" => {
                let count: usize = tokenizer.parse("a vertex count")?;
                for index in 0..count {
                    let line = tokenizer.line();
                    tokenizer.expect("vert")?;
                    expect_index(tokenizer, index)?;
                    tokenizer.expect("(")?;
                    let tex_coord = [tokenizer.parse("a number")?, tokenizer.parse("a number")?];
                    tokenizer.expect(")")?;

                    raw_mesh.vertices.push(RawVertex {
                        line,
                        tex_coord,
                        start_weight: tokenizer.parse("a weight index")?,
                        weight_count: tokenizer.parse("a weight count")?,
                    });
                }
            }
            "numtris" => {
                let count: usize = tokenizer.parse("a triangle count")?;
                for index in 0..count {
                    let line = tokenizer.line();
                    tokenizer.expect("tri")?;
                    expect_index(tokenizer, index)?;
                    let triangle = [
                        tokenizer.parse("a vertex index")?,
                        tokenizer.parse("a vertex index")?,
                        tokenizer.parse("a vertex index")?,
                    ];
                    raw_mesh.triangles.push((line, triangle));
                }
            }
            "numweights" => {
                let count: usize = tokenizer.parse("a weight count")?;
                for index in 0..count {
                    let line = tokenizer.line();
                    tokenizer.expect("weight")?;
                    expect_index(tokenizer, index)?;

                    raw_mesh.weights.push(RawWeight {
                        line,
                        joint: tokenizer.parse("a joint index")?,
                        bias: tokenizer.parse("a bias")?,
                        position: tokenizer.vector3()?,
                    });
                }
            }
            other => {
                return Err(Error::Parse {
                    line,
                    message: format!("unexpected token '{other}' in mesh"),
                })
            }
        }
    }

    Ok(raw_mesh)
}

fn expect_index(tokenizer: &mut Tokenizer, expected: usize) -> Result<(), Error> {
    let line = tokenizer.line();
    let index: usize = tokenizer.parse("an index")?;
    if index != expected {
        return Err(Error::Parse {
            line,
            message: format!("expected entry {expected}, found {index}"),
        });
    }

    Ok(())
}

fn build_sub_mesh(raw_mesh: RawSubMesh, skeleton: &Skeleton) -> Result<Md5SubMesh, Error> {
    let bones = skeleton.bones();

    for weight in raw_mesh.weights.iter() {
        if weight.joint >= bones.len() {
            return Err(Error::ContractViolation(format!(
                "line {}: weight references bone {} of {}",
                weight.line,
                weight.joint,
                bones.len()
            )));
        }
    }

    let mut vertices = Vec::with_capacity(raw_mesh.vertices.len());
    for raw_vertex in raw_mesh.vertices.iter() {
        if raw_vertex.weight_count > MAX_WEIGHTS_PER_VERTEX {
            return Err(Error::ContractViolation(format!(
                "line {}: {} weights exceed the limit of {MAX_WEIGHTS_PER_VERTEX}",
                raw_vertex.line, raw_vertex.weight_count
            )));
        }

        let out_of_range = || {
            Error::ContractViolation(format!(
                "line {}: {} weights starting at {} are out of range",
                raw_vertex.line, raw_vertex.weight_count, raw_vertex.start_weight
            ))
        };
        let end_weight = raw_vertex
            .start_weight
            .checked_add(raw_vertex.weight_count)
            .ok_or_else(out_of_range)?;
        let weights = raw_mesh
            .weights
            .get(raw_vertex.start_weight..end_weight)
            .ok_or_else(out_of_range)?;

        let mut position = Vector3::zero();
        let mut vertex = SkinnedVertex {
            tex_coord: raw_vertex.tex_coord,
            ..Default::default()
        };

        for (slot, weight) in weights.iter().enumerate() {
            let bone = &bones[weight.joint];
            let offset = bone.orientation.rotate_vector(weight.position.into());
            position += (bone.position + offset) * weight.bias;

            vertex.bone_indices[slot] = weight.joint as u32;
            vertex.bone_weights[slot] = weight.bias;
        }

        vertex.position = position.into();
        vertices.push(vertex);
    }

    let mut normals = vec![Vector3::<f32>::zero(); vertices.len()];
    let mut indices = Vec::with_capacity(raw_mesh.triangles.len() * 3);
    for (line, triangle) in raw_mesh.triangles.iter() {
        if let Some(index) = triangle.iter().find(|index| **index as usize >= vertices.len()) {
            return Err(Error::ContractViolation(format!(
                "line {line}: triangle references vertex {index} of {}",
                vertices.len()
            )));
        }

        let [v0, v1, v2] = triangle.map(|index| Vector3::from(vertices[index as usize].position));
        let normal = (v2 - v0).cross(v1 - v0);
        for index in triangle.iter() {
            normals[*index as usize] += normal;
        }

        indices.extend_from_slice(triangle);
    }

    for (vertex, normal) in vertices.iter_mut().zip(normals) {
        if normal.magnitude2() > 0.0 {
            vertex.normal = normal.normalize().into();
        }
    }

    Ok(Md5SubMesh {
        texture: raw_mesh.texture,
        vertices,
        indices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUAD: &str = r#"
MD5Version 10
commandline ""

numJoints 2
numMeshes 1

joints {
    "origin" -1 ( 0 0 0 ) ( 0 0 0 )  // root
    "offset" 0 ( 0 0 1 ) ( 0 0 0 )
}

mesh {
    shader "models/quad.tga"

    numverts 4
    vert 0 ( 0 0 ) 0 1
    vert 1 ( 1 0 ) 1 1
    vert 2 ( 1 1 ) 2 2
    vert 3 ( 0 1 ) 4 1

    numtris 2
    tri 0 0 1 2
    tri 1 0 2 3

    numweights 5
    weight 0 0 1 ( 0 0 0 )
    weight 1 0 1 ( 1 0 0 )
    weight 2 0 0.5 ( 1 1 0 )
    weight 3 1 0.5 ( 1 1 -1 )
    weight 4 1 1 ( 0 1 -1 )
}
"#;

    #[test]
    fn quad_is_parsed_into_bind_pose_vertices() {
        let model = parse_mesh(QUAD).unwrap();
        assert_eq!(model.skeleton.bone_count(), 2);
        assert_eq!(model.meshes.len(), 1);

        let mesh = &model.meshes[0];
        assert_eq!(mesh.texture, "models/quad.tga");
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices, vec![0, 1, 2, 0, 2, 3]);

        for (vertex, expected) in mesh.vertices.iter().zip([
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
        ]) {
            for axis in 0..3 {
                assert!((vertex.position[axis] - expected[axis]).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn bone_influences_are_recorded_per_vertex() {
        let model = parse_mesh(QUAD).unwrap();
        let vertex = model.meshes[0].vertices[2];

        assert_eq!(vertex.bone_indices, [0, 1, 0, 0]);
        assert_eq!(vertex.bone_weights, [0.5, 0.5, 0.0, 0.0]);
        assert_eq!(vertex.tex_coord, [1.0, 1.0]);
    }

    #[test]
    fn face_normals_use_the_reversed_cross_product() {
        let model = parse_mesh(QUAD).unwrap();

        for vertex in model.meshes[0].vertices.iter() {
            assert!((vertex.normal[2] + 1.0).abs() < 1e-5, "{:?}", vertex.normal);
        }
    }

    #[test]
    fn out_of_range_bone_fails_the_load() {
        let broken = QUAD.replace("weight 4 1 1", "weight 4 7 1");
        match parse_mesh(&broken) {
            Err(Error::ContractViolation(message)) => assert!(message.contains("bone 7")),
            Err(other) => panic!("expected ContractViolation, got {other:?}"),
            Ok(_) => panic!("expected ContractViolation, got a model"),
        }
    }

    #[test]
    fn more_than_four_weights_fail_the_load() {
        let broken = QUAD.replace("vert 0 ( 0 0 ) 0 1", "vert 0 ( 0 0 ) 0 5");
        assert!(matches!(parse_mesh(&broken), Err(Error::ContractViolation(_))));
    }

    #[test]
    fn weight_range_past_the_end_of_memory_fails_the_load() {
        let broken = QUAD.replace(
            "vert 0 ( 0 0 ) 0 1",
            &format!("vert 0 ( 0 0 ) {} 1", usize::MAX),
        );
        match parse_mesh(&broken) {
            Err(Error::ContractViolation(message)) => assert!(message.contains("out of range")),
            Err(other) => panic!("expected ContractViolation, got {other:?}"),
            Ok(_) => panic!("expected ContractViolation, got a model"),
        }
    }

    #[test]
    fn mismatched_joint_count_fails_the_load() {
        let broken = QUAD.replace("numJoints 2", "numJoints 3");
        assert!(matches!(parse_mesh(&broken), Err(Error::ContractViolation(_))));
    }

    #[test]
    fn triangle_outside_the_vertex_list_fails_the_load() {
        let broken = QUAD.replace("tri 1 0 2 3", "tri 1 0 2 9");
        assert!(matches!(parse_mesh(&broken), Err(Error::ContractViolation(_))));
    }

    #[test]
    fn malformed_numbers_report_their_line() {
        let broken = QUAD.replace("numverts 4", "numverts four");
        match parse_mesh(&broken) {
            Err(Error::Parse { line, .. }) => assert_eq!(line, 16),
            Err(other) => panic!("expected Parse, got {other:?}"),
            Ok(_) => panic!("expected Parse, got a model"),
        }
    }
}

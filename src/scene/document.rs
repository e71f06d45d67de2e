//! glTF 2.0 document assembly from per-material assembly results.
//!
//! Each material contributes five buffer views and five accessors
//! (POSITION, TEXCOORD_0, TEXCOORD_1, COLOR_0, indices), one material, one
//! single-primitive mesh and one node; all three carry the material key as
//! their name. Only POSITION accessors carry min/max.

use gltf_json as json;
use json::validation::Checked::Valid;
use json::validation::USize64;
use smol_str::SmolStr;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::atlas::TextureImage;
use crate::buffer::{BufferFile, BufferSlice};
use crate::error::Result;

/// Buffer locations and bounds of one assembled material mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshSlices {
    pub vertex_count: usize,
    pub index_count: usize,
    pub min: [f32; 3],
    pub max: [f32; 3],
    pub positions: BufferSlice,
    pub uv0: BufferSlice,
    pub uv1: BufferSlice,
    pub colors: BufferSlice,
    pub indices: BufferSlice,
}

/// What the assembly phase produced for one material key.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialOutput {
    pub key: SmolStr,
    /// Index into the texture image list, if the material has a texture.
    pub image: Option<usize>,
    pub double_sided: bool,
    pub accepted: u64,
    pub duplicates: u64,
    pub degenerate: u64,
    /// `None` when every quad of the material was rejected.
    pub mesh: Option<MeshSlices>,
}

fn view(
    slice: BufferSlice,
    byte_length: usize,
    target: json::buffer::Target,
    name: String,
) -> json::buffer::View {
    json::buffer::View {
        buffer: json::Index::new(slice.buffer as u32),
        byte_length: USize64(byte_length as u64),
        byte_offset: Some(USize64(slice.offset)),
        byte_stride: None,
        name: Some(name),
        target: Some(Valid(target)),
        extensions: Default::default(),
        extras: Default::default(),
    }
}

fn accessor(
    buffer_view: u32,
    count: usize,
    type_: json::accessor::Type,
    component_type: json::accessor::ComponentType,
    min: Option<json::Value>,
    max: Option<json::Value>,
    name: String,
) -> json::Accessor {
    json::Accessor {
        buffer_view: Some(json::Index::new(buffer_view)),
        byte_offset: Some(USize64(0)),
        count: USize64(count as u64),
        component_type: Valid(json::accessor::GenericComponentType(component_type)),
        extensions: Default::default(),
        extras: Default::default(),
        type_: Valid(type_),
        min,
        max,
        name: Some(name),
        normalized: false,
        sparse: None,
    }
}

fn material(output: &MaterialOutput) -> json::Material {
    json::Material {
        pbr_metallic_roughness: json::material::PbrMetallicRoughness {
            base_color_texture: output.image.map(|image| json::texture::Info {
                index: json::Index::new(image as u32),
                tex_coord: 0,
                extensions: Default::default(),
                extras: Default::default(),
            }),
            base_color_factor: json::material::PbrBaseColorFactor([1.0, 1.0, 1.0, 1.0]),
            metallic_factor: json::material::StrengthFactor(0.0),
            roughness_factor: json::material::StrengthFactor(1.0),
            metallic_roughness_texture: None,
            extensions: Default::default(),
            extras: Default::default(),
        },
        alpha_mode: Valid(json::material::AlphaMode::Opaque),
        alpha_cutoff: None,
        double_sided: output.double_sided,
        name: Some(output.key.to_string()),
        normal_texture: None,
        occlusion_texture: None,
        emissive_texture: None,
        emissive_factor: json::material::EmissiveFactor([0.0, 0.0, 0.0]),
        extensions: Default::default(),
        extras: Default::default(),
    }
}

/// Build the document for `materials`, in the order given.
///
/// Materials without a mesh are left out.
pub fn build_document(
    generator: &str,
    buffers: &[BufferFile],
    images: &[TextureImage],
    materials: &[MaterialOutput],
) -> json::Root {
    use json::accessor::{ComponentType, Type};
    use json::buffer::Target;

    let mut buffer_views = Vec::new();
    let mut accessors = Vec::new();
    let mut gltf_materials = Vec::new();
    let mut meshes = Vec::new();
    let mut nodes = Vec::new();

    for output in materials {
        let Some(mesh) = &output.mesh else {
            continue;
        };
        let key = output.key.as_str();
        let first_view = buffer_views.len() as u32;
        let first_accessor = accessors.len() as u32;
        let vertices = mesh.vertex_count;

        buffer_views.push(view(
            mesh.positions,
            vertices * 12,
            Target::ArrayBuffer,
            format!("{}_positions", key),
        ));
        buffer_views.push(view(mesh.uv0, vertices * 8, Target::ArrayBuffer, format!("{}_uv0", key)));
        buffer_views.push(view(mesh.uv1, vertices * 8, Target::ArrayBuffer, format!("{}_uv1", key)));
        buffer_views.push(view(
            mesh.colors,
            vertices * 16,
            Target::ArrayBuffer,
            format!("{}_colors", key),
        ));
        buffer_views.push(view(
            mesh.indices,
            mesh.index_count * 4,
            Target::ElementArrayBuffer,
            format!("{}_indices", key),
        ));

        accessors.push(accessor(
            first_view,
            vertices,
            Type::Vec3,
            ComponentType::F32,
            Some(json::Value::from(mesh.min.to_vec())),
            Some(json::Value::from(mesh.max.to_vec())),
            format!("{}_POSITION", key),
        ));
        accessors.push(accessor(
            first_view + 1,
            vertices,
            Type::Vec2,
            ComponentType::F32,
            None,
            None,
            format!("{}_TEXCOORD_0", key),
        ));
        accessors.push(accessor(
            first_view + 2,
            vertices,
            Type::Vec2,
            ComponentType::F32,
            None,
            None,
            format!("{}_TEXCOORD_1", key),
        ));
        accessors.push(accessor(
            first_view + 3,
            vertices,
            Type::Vec4,
            ComponentType::F32,
            None,
            None,
            format!("{}_COLOR_0", key),
        ));
        accessors.push(accessor(
            first_view + 4,
            mesh.index_count,
            Type::Scalar,
            ComponentType::U32,
            None,
            None,
            format!("{}_indices", key),
        ));

        let material_index = gltf_materials.len() as u32;
        gltf_materials.push(material(output));

        let mut attributes = BTreeMap::new();
        attributes.insert(
            Valid(json::mesh::Semantic::Positions),
            json::Index::new(first_accessor),
        );
        attributes.insert(
            Valid(json::mesh::Semantic::TexCoords(0)),
            json::Index::new(first_accessor + 1),
        );
        attributes.insert(
            Valid(json::mesh::Semantic::TexCoords(1)),
            json::Index::new(first_accessor + 2),
        );
        attributes.insert(
            Valid(json::mesh::Semantic::Colors(0)),
            json::Index::new(first_accessor + 3),
        );

        let mesh_index = meshes.len() as u32;
        meshes.push(json::Mesh {
            extensions: Default::default(),
            extras: Default::default(),
            name: Some(key.to_string()),
            primitives: vec![json::mesh::Primitive {
                attributes,
                extensions: Default::default(),
                extras: Default::default(),
                indices: Some(json::Index::new(first_accessor + 4)),
                material: Some(json::Index::new(material_index)),
                mode: Valid(json::mesh::Mode::Triangles),
                targets: None,
            }],
            weights: None,
        });

        nodes.push(json::Node {
            camera: None,
            children: None,
            extensions: Default::default(),
            extras: Default::default(),
            matrix: None,
            mesh: Some(json::Index::new(mesh_index)),
            name: Some(key.to_string()),
            rotation: None,
            scale: None,
            translation: None,
            skin: None,
            weights: None,
        });
    }

    let scene_nodes = (0..nodes.len() as u32).map(json::Index::new).collect();

    json::Root {
        asset: json::Asset {
            copyright: None,
            extensions: Default::default(),
            extras: Default::default(),
            generator: Some(generator.to_string()),
            min_version: None,
            version: "2.0".to_string(),
        },
        accessors,
        buffers: buffers
            .iter()
            .map(|buffer| json::Buffer {
                byte_length: USize64(buffer.byte_length),
                extensions: Default::default(),
                extras: Default::default(),
                name: None,
                uri: Some(buffer.uri.clone()),
            })
            .collect(),
        buffer_views,
        images: images
            .iter()
            .map(|image| json::Image {
                buffer_view: None,
                mime_type: None,
                name: None,
                uri: Some(image.uri.clone()),
                extensions: Default::default(),
                extras: Default::default(),
            })
            .collect(),
        samplers: if images.is_empty() {
            Vec::new()
        } else {
            vec![json::texture::Sampler {
                mag_filter: Some(Valid(json::texture::MagFilter::Nearest)),
                min_filter: Some(Valid(json::texture::MinFilter::Nearest)),
                name: None,
                wrap_s: Valid(json::texture::WrappingMode::Repeat),
                wrap_t: Valid(json::texture::WrappingMode::Repeat),
                extensions: Default::default(),
                extras: Default::default(),
            }]
        },
        textures: (0..images.len() as u32)
            .map(|image| json::Texture {
                name: None,
                sampler: Some(json::Index::new(0)),
                source: json::Index::new(image),
                extensions: Default::default(),
                extras: Default::default(),
            })
            .collect(),
        materials: gltf_materials,
        meshes,
        nodes,
        scenes: vec![json::Scene {
            extensions: Default::default(),
            extras: Default::default(),
            name: None,
            nodes: scene_nodes,
        }],
        scene: Some(json::Index::new(0)),
        ..Default::default()
    }
}

/// Serialize `root` to `path` through a sibling `.tmp` file and a rename.
pub fn write_document(root: &json::Root, path: &Path) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    let text = json::serialize::to_string_pretty(root)?;
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(text.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

// tr_light.rs — dynamic light setup, culling, scissoring and the per-frame
// light/surface interaction lists consumed by the lighting passes.

use bitflags::bitflags;

use myq3_common::q_shared::{
    add_point_to_bounds, bounds_intersect, box_on_plane_side, calc_frustum_far_corners,
    calc_frustum_near_corners, clear_bounds, cross_product, dot_product, matrix_affine_inverse,
    matrix_from_angles, matrix_from_planes, matrix_multiply, matrix_perspective_projection,
    matrix_setup_scale, matrix_setup_transform_from_quat, matrix_setup_transform_from_rotation,
    matrix_transform_plane, matrix_transform_point, matrix_transform_vec4, planes_get_intersection_point,
    plane_normalize, quat_to_axis, radius_from_bounds, setup_frustum_from_matrix, vector_compare,
    vector_length, vector_ma, vector_negate, vector_normalize, vector_normalize2, vector_scale,
    vector_subtract, CPlane, Frustum, Mat4, Quat, Vec3, Vec4, FRUSTUM_BOTTOM, FRUSTUM_FAR,
    FRUSTUM_LEFT, FRUSTUM_NEAR, FRUSTUM_RIGHT, FRUSTUM_TOP, MATRIX_IDENTITY,
    QUAKE_TO_OPENGL_MATRIX, QUAT_IDENTITY, VEC3_ORIGIN,
};

use crate::device::{BufferKind, GpuDevice};
use crate::tr_local::{LightFrustumMesh, PerfCounters, RenderConfig, ScissorRect, ViewParms};

// ============================================================
// Constants
// ============================================================

/// Interaction arena capacity; must be a power of two for index masking.
pub const MAX_INTERACTIONS: usize = 32 * 1024;
pub const INTERACTION_MASK: usize = MAX_INTERACTIONS - 1;

/// All six cube shadow faces need rendering.
pub const CUBESIDE_CLIPALL: u8 = 0x3F;

const SHADOW_LOD_NUM_LODS: i32 = 5;

// ============================================================
// Types
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefLightType {
    Omni,
    Proj,
    Directional,
}

bitflags! {
    /// What an interaction contributes to the lighting passes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InteractionType: u32 {
        const LIGHT      = 1 << 0;
        const SHADOW     = 1 << 1;
        const SHADOWCLIP = 1 << 2;
    }
}

impl InteractionType {
    pub const DEFAULT: InteractionType = InteractionType::all();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullResult {
    In,
    Clip,
    Out,
}

/// The externally supplied light description.
#[derive(Debug, Clone)]
pub struct LightParams {
    pub rl_type: RefLightType,
    /// World placement.
    pub origin: Vec3,
    /// Local center offset.
    pub center: Vec3,
    pub radius: Vec3,
    pub rotation: Quat,

    // projected lights
    pub proj_target: Vec3,
    pub proj_right: Vec3,
    pub proj_up: Vec3,
    pub proj_start: Vec3,
    pub proj_end: Vec3,

    pub color: Vec3,
    pub scale: f32,
    pub no_shadows: bool,
    pub inverse_shadows: bool,
}

impl Default for LightParams {
    fn default() -> Self {
        Self {
            rl_type: RefLightType::Omni,
            origin: VEC3_ORIGIN,
            center: VEC3_ORIGIN,
            radius: [300.0, 300.0, 300.0],
            rotation: QUAT_IDENTITY,
            proj_target: VEC3_ORIGIN,
            proj_right: VEC3_ORIGIN,
            proj_up: VEC3_ORIGIN,
            proj_start: VEC3_ORIGIN,
            proj_end: VEC3_ORIGIN,
            color: [1.0, 1.0, 1.0],
            scale: 1.0,
            no_shadows: false,
            inverse_shadows: false,
        }
    }
}

/// A light with all per-frame derived state.
#[derive(Debug, Clone)]
pub struct RefLight {
    pub l: LightParams,
    pub is_static: bool,

    // derived placement
    pub origin: Vec3,
    pub direction: Vec3,
    pub transform_matrix: Mat4,
    pub view_matrix: Mat4,
    pub projection_matrix: Mat4,

    // derived volume
    pub local_bounds: [Vec3; 2],
    pub world_bounds: [Vec3; 2],
    pub sphere_radius: f32,
    /// Local clip planes of a projected light, (normal, dist) form.
    pub local_frustum: [Vec4; 6],
    /// World-space clip planes.
    pub frustum: Frustum,
    pub falloff_length: f32,

    // view-dependent state
    pub scissor: ScissorRect,
    pub clips_near_plane: bool,
    pub no_occlusion_queries: bool,
    pub shadow_lod: i32,
    pub frustum_mesh: Option<LightFrustumMesh>,

    // interaction list
    pub first_interaction: i32,
    pub last_interaction: i32,
    pub num_interactions: u32,
    pub num_shadow_only_interactions: u32,
    pub num_light_only_interactions: u32,
    pub no_sort: bool,
}

impl RefLight {
    pub fn new(l: LightParams, is_static: bool) -> Self {
        Self {
            l,
            is_static,
            origin: VEC3_ORIGIN,
            direction: [0.0, 0.0, 1.0],
            transform_matrix: MATRIX_IDENTITY,
            view_matrix: MATRIX_IDENTITY,
            projection_matrix: MATRIX_IDENTITY,
            local_bounds: [VEC3_ORIGIN; 2],
            world_bounds: [VEC3_ORIGIN; 2],
            sphere_radius: 0.0,
            local_frustum: [[0.0; 4]; 6],
            frustum: [CPlane::default(); 6],
            falloff_length: 1.0,
            scissor: ScissorRect::default(),
            clips_near_plane: false,
            no_occlusion_queries: false,
            shadow_lod: 0,
            frustum_mesh: None,
            first_interaction: -1,
            last_interaction: -1,
            num_interactions: 0,
            num_shadow_only_interactions: 0,
            num_light_only_interactions: 0,
            no_sort: false,
        }
    }

    /// Reset the per-frame interaction list.
    pub fn clear_interactions(&mut self) {
        self.first_interaction = -1;
        self.last_interaction = -1;
        self.num_interactions = 0;
        self.num_shadow_only_interactions = 0;
        self.num_light_only_interactions = 0;
        self.no_sort = false;
    }
}

/// Shader properties the interaction gathering keys off.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceShaderFlags {
    pub is_sky: bool,
    pub interact_light: bool,
    pub no_shadows: bool,
    pub sorted_index: i32,
}

/// One candidate surface of an entity.
#[derive(Debug, Clone, Copy)]
pub struct EntitySurface {
    pub surface: u32,
    pub shader: SurfaceShaderFlags,
}

// ============================================================
// Interaction arena
// ============================================================

/// A (light, surface) pairing recorded for this frame.
#[derive(Debug, Clone)]
pub struct Interaction {
    pub light: usize,
    /// None is the world entity.
    pub entity: Option<usize>,
    pub surface: u32,
    pub shader_num: i32,
    pub ia_type: InteractionType,
    pub cube_side_bits: u8,
    pub scissor: ScissorRect,
    pub no_occlusion_queries: bool,
    /// Next interaction of the same light, -1 terminates.
    pub next: i32,
}

/// Fixed-capacity per-frame interaction storage. Indices are masked, so
/// exceeding the capacity overwrites the oldest entries; every wrapped
/// write is counted in `overflows` rather than disappearing silently.
pub struct InteractionArena {
    interactions: Vec<Interaction>,
    capacity: usize,
    num_interactions: usize,
    pub overflows: u32,
}

impl InteractionArena {
    pub fn new() -> Self {
        Self::with_capacity(MAX_INTERACTIONS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two());
        Self {
            interactions: Vec::new(),
            capacity,
            num_interactions: 0,
            overflows: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn mask(&self) -> usize {
        self.capacity - 1
    }

    /// Invalidate everything recorded for the previous frame.
    pub fn clear(&mut self) {
        self.interactions.clear();
        self.num_interactions = 0;
        self.overflows = 0;
    }

    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    pub fn total_added(&self) -> usize {
        self.num_interactions
    }

    pub fn get(&self, index: usize) -> &Interaction {
        &self.interactions[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Interaction {
        &mut self.interactions[index]
    }

    fn push(&mut self, interaction: Interaction) -> usize {
        let index = self.num_interactions & self.mask();
        if index < self.interactions.len() {
            // wrapped around, drop the oldest entry
            self.interactions[index] = interaction;
            self.overflows += 1;
        } else {
            self.interactions.push(interaction);
        }
        self.num_interactions += 1;
        index
    }
}

impl Default for InteractionArena {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================
// Light placement
// ============================================================

/// Derive the transform matrix from the light's rotation and placement.
pub fn setup_light_transform(light: &mut RefLight) {
    light.transform_matrix =
        matrix_setup_transform_from_quat(&light.l.rotation, &light.l.origin);
}

/// Needs a finished transform matrix.
pub fn setup_light_origin(light: &mut RefLight) {
    if light.l.rl_type == RefLightType::Directional {
        let reference = if !vector_compare(&light.l.center, &VEC3_ORIGIN) {
            light.l.center
        } else {
            [0.0, 0.0, 1.0]
        };
        let transformed = matrix_transform_point(&light.transform_matrix, &reference);
        let mut direction = vector_subtract(&transformed, &light.l.origin);
        vector_normalize(&mut direction);
        light.direction = direction;

        light.origin = vector_ma(&light.l.origin, 10000.0, &direction);
        if vector_compare(&light.l.center, &VEC3_ORIGIN) {
            light.origin = light.l.origin;
        }
    } else {
        light.origin = matrix_transform_point(&light.transform_matrix, &light.l.center);
    }
}

/// Local-space bounds per light type. Projected lights need the local
/// frustum, so call after `setup_light_projection`.
pub fn setup_light_local_bounds(light: &mut RefLight) {
    match light.l.rl_type {
        RefLightType::Omni | RefLightType::Directional => {
            light.local_bounds[0] = vector_negate(&light.l.radius);
            light.local_bounds[1] = light.l.radius;
        }
        RefLightType::Proj => {
            let frustum = &light.local_frustum;
            let mut mins = VEC3_ORIGIN;
            let mut maxs = VEC3_ORIGIN;
            clear_bounds(&mut mins, &mut maxs);

            let far_corners = calc_frustum_far_corners(frustum);

            if !vector_compare(&light.l.proj_start, &VEC3_ORIGIN) {
                let near_corners = calc_frustum_near_corners(frustum);
                for j in 0..4 {
                    add_point_to_bounds(&far_corners[j], &mut mins, &mut maxs);
                    add_point_to_bounds(&near_corners[j], &mut mins, &mut maxs);
                }
            } else {
                let top = planes_get_intersection_point(
                    &frustum[FRUSTUM_LEFT],
                    &frustum[FRUSTUM_RIGHT],
                    &frustum[FRUSTUM_TOP],
                )
                .unwrap_or(VEC3_ORIGIN);
                add_point_to_bounds(&top, &mut mins, &mut maxs);

                for corner in &far_corners {
                    add_point_to_bounds(corner, &mut mins, &mut maxs);
                }
            }

            light.local_bounds = [mins, maxs];
        }
    }

    light.sphere_radius = radius_from_bounds(&light.local_bounds[0], &light.local_bounds[1]);
}

/// Needs a finished transform matrix.
pub fn setup_light_world_bounds(light: &mut RefLight) {
    let mut mins = VEC3_ORIGIN;
    let mut maxs = VEC3_ORIGIN;
    clear_bounds(&mut mins, &mut maxs);

    for j in 0..8 {
        let v = [
            light.local_bounds[j & 1][0],
            light.local_bounds[(j >> 1) & 1][1],
            light.local_bounds[(j >> 2) & 1][2],
        ];
        let transformed = matrix_transform_point(&light.transform_matrix, &v);
        add_point_to_bounds(&transformed, &mut mins, &mut maxs);
    }

    light.world_bounds = [mins, maxs];
}

pub fn setup_light_view(light: &mut RefLight) {
    light.view_matrix = matrix_affine_inverse(&light.transform_matrix);
}

// ============================================================
// Light projection and frustum
// ============================================================

/// Convert a signed plane value form (normal, offset) into (normal, dist).
fn plane_from_value(v: Vec4) -> Vec4 {
    [v[0], v[1], v[2], -v[3]]
}

fn vec4_ma(a: &Vec4, scale: f32, b: &Vec4) -> Vec4 {
    [
        a[0] + scale * b[0],
        a[1] + scale * b[1],
        a[2] + scale * b[2],
        a[3] + scale * b[3],
    ]
}

fn vec4_sub(a: &Vec4, b: &Vec4) -> Vec4 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2], a[3] - b[3]]
}

pub fn setup_light_projection(light: &mut RefLight) {
    match light.l.rl_type {
        RefLightType::Omni | RefLightType::Directional => {
            light.projection_matrix = matrix_setup_scale(
                1.0 / light.l.radius[0],
                1.0 / light.l.radius[1],
                1.0 / light.l.radius[2],
            );
        }
        RefLightType::Proj => {
            let mut right = VEC3_ORIGIN;
            let r_len = vector_normalize2(&light.l.proj_right, &mut right);
            let mut up = VEC3_ORIGIN;
            let u_len = vector_normalize2(&light.l.proj_up, &mut up);

            let mut normal = cross_product(&up, &right);
            vector_normalize(&mut normal);

            let mut dist = dot_product(&light.l.proj_target, &normal);
            if dist < 0.0 {
                dist = -dist;
                normal = vector_negate(&normal);
            }

            let right = vector_scale(&right, (0.5 * dist) / r_len);
            let up = vector_scale(&up, -(0.5 * dist) / u_len);

            // projective texture coordinates: s along right, t along up,
            // q the depth divisor
            let mut light_project: [Vec4; 4] = [
                [right[0], right[1], right[2], 0.0],
                [up[0], up[1], up[2], 0.0],
                [normal[0], normal[1], normal[2], 0.0],
                [0.0; 4],
            ];

            // offset so the target maps to the center of the texture
            let target_global = [
                light.l.proj_target[0],
                light.l.proj_target[1],
                light.l.proj_target[2],
                1.0,
            ];
            let dot4 = |a: &Vec4, b: &Vec4| a[0] * b[0] + a[1] * b[1] + a[2] * b[2] + a[3] * b[3];
            let depth_plane = light_project[2];
            for axis in 0..2 {
                let a = dot4(&target_global, &light_project[axis]);
                let b = dot4(&target_global, &depth_plane);
                let ofs = 0.5 - a / b;
                light_project[axis] = vec4_ma(&light_project[axis], ofs, &depth_plane);
            }

            let start = if !vector_compare(&light.l.proj_start, &VEC3_ORIGIN) {
                light.l.proj_start
            } else {
                VEC3_ORIGIN
            };
            let stop = if !vector_compare(&light.l.proj_end, &VEC3_ORIGIN) {
                light.l.proj_end
            } else {
                light.l.proj_target
            };

            // falloff texture coordinate, 0 at the start plane and 1 at
            // the end plane
            let mut falloff = vector_subtract(&stop, &start);
            let mut falloff_len = vector_normalize(&mut falloff);
            light.falloff_length = falloff_len;
            if falloff_len <= 0.0 {
                falloff_len = 1.0;
            }
            let falloff = vector_scale(&falloff, 1.0 / falloff_len);

            light_project[3] = [
                falloff[0],
                falloff[1],
                falloff[2],
                -dot_product(&start, &falloff),
            ];

            // the planes of s=0, s=q, t=0, t=q bound the pyramid sides
            let mut frustum = [[0.0f32; 4]; 6];
            frustum[FRUSTUM_LEFT] = plane_from_value(light_project[0]);
            frustum[FRUSTUM_BOTTOM] = plane_from_value(light_project[1]);
            frustum[FRUSTUM_RIGHT] =
                plane_from_value(vec4_sub(&light_project[2], &light_project[0]));
            frustum[FRUSTUM_TOP] = plane_from_value(vec4_sub(&light_project[2], &light_project[1]));

            // u=0 and u=1 close the volume front and back
            frustum[FRUSTUM_NEAR] = plane_from_value(light_project[3]);
            frustum[FRUSTUM_FAR] = [
                -light_project[3][0],
                -light_project[3][1],
                -light_project[3][2],
                light_project[3][3] - 1.0,
            ];

            light.projection_matrix = matrix_from_planes(
                &frustum[FRUSTUM_LEFT],
                &frustum[FRUSTUM_RIGHT],
                &frustum[FRUSTUM_BOTTOM],
                &frustum[FRUSTUM_TOP],
                &frustum[FRUSTUM_NEAR],
                &frustum[FRUSTUM_FAR],
            );

            for plane in frustum.iter_mut() {
                plane_normalize(plane);
            }
            light.local_frustum = frustum;
        }
    }
}

/// World-space clip planes for the light volume.
pub fn setup_light_frustum(light: &mut RefLight) {
    match light.l.rl_type {
        RefLightType::Omni | RefLightType::Directional => {
            let axis = quat_to_axis(&light.l.rotation);

            for i in 0..3 {
                let plane_origin = vector_ma(&light.origin, light.l.radius[i], &axis[i]);
                let mut plane_normal = vector_negate(&axis[i]);
                vector_normalize(&mut plane_normal);
                light.frustum[i] =
                    CPlane::new(plane_normal, dot_product(&plane_origin, &plane_normal));
            }

            for i in 0..3 {
                let plane_origin = vector_ma(&light.origin, -light.l.radius[i], &axis[i]);
                let mut plane_normal = axis[i];
                vector_normalize(&mut plane_normal);
                light.frustum[i + 3] =
                    CPlane::new(plane_normal, dot_product(&plane_origin, &plane_normal));
            }
        }
        RefLightType::Proj => {
            for i in 0..6 {
                let mut world =
                    matrix_transform_plane(&light.transform_matrix, &light.local_frustum[i]);
                plane_normalize(&mut world);
                light.frustum[i] = CPlane::from_vec4(&world);
            }
        }
    }
}

// ============================================================
// Light frustum mesh
// ============================================================

fn add_quad(mesh: &mut LightFrustumMesh, verts: [Vec3; 4]) {
    let base = mesh.verts.len() as u32;
    mesh.verts.extend_from_slice(&verts);
    mesh.indexes
        .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
}

fn add_triangle(mesh: &mut LightFrustumMesh, verts: [Vec3; 3]) {
    let base = mesh.verts.len() as u32;
    mesh.verts.extend_from_slice(&verts);
    mesh.indexes.extend_from_slice(&[base, base + 1, base + 2]);
}

/// Tessellate the light volume into triangles in light-local space.
pub fn tess_light(light: &RefLight) -> LightFrustumMesh {
    let mut mesh = LightFrustumMesh::default();

    match light.l.rl_type {
        RefLightType::Omni | RefLightType::Directional => {
            let bounds = light.local_bounds;
            let corner =
                |x: usize, y: usize, z: usize| -> Vec3 { [bounds[x][0], bounds[y][1], bounds[z][2]] };

            // -x, +x, -y, +y, -z, +z faces
            add_quad(&mut mesh, [corner(0, 0, 0), corner(0, 1, 0), corner(0, 1, 1), corner(0, 0, 1)]);
            add_quad(&mut mesh, [corner(1, 0, 0), corner(1, 0, 1), corner(1, 1, 1), corner(1, 1, 0)]);
            add_quad(&mut mesh, [corner(0, 0, 0), corner(0, 0, 1), corner(1, 0, 1), corner(1, 0, 0)]);
            add_quad(&mut mesh, [corner(0, 1, 0), corner(1, 1, 0), corner(1, 1, 1), corner(0, 1, 1)]);
            add_quad(&mut mesh, [corner(0, 0, 0), corner(1, 0, 0), corner(1, 1, 0), corner(0, 1, 0)]);
            add_quad(&mut mesh, [corner(0, 0, 1), corner(0, 1, 1), corner(1, 1, 1), corner(1, 0, 1)]);
        }
        RefLightType::Proj => {
            let frustum = &light.local_frustum;
            let far = calc_frustum_far_corners(frustum);

            if !vector_compare(&light.l.proj_start, &VEC3_ORIGIN) {
                let near = calc_frustum_near_corners(frustum);

                // side quads
                for j in 0..4 {
                    let k = (j + 1) % 4;
                    add_quad(&mut mesh, [near[j], far[j], far[k], near[k]]);
                }
                // far and near caps
                add_quad(&mut mesh, [far[3], far[2], far[1], far[0]]);
                add_quad(&mut mesh, [near[0], near[1], near[2], near[3]]);
            } else {
                // no light_start, just use the top vertex
                let top = planes_get_intersection_point(
                    &frustum[FRUSTUM_LEFT],
                    &frustum[FRUSTUM_RIGHT],
                    &frustum[FRUSTUM_TOP],
                )
                .unwrap_or(VEC3_ORIGIN);

                for j in 0..4 {
                    add_triangle(&mut mesh, [top, far[(j + 1) % 4], far[j]]);
                }
                add_quad(&mut mesh, [far[0], far[1], far[2], far[3]]);
            }
        }
    }

    mesh
}

/// Static lights keep their world-space frustum geometry in device buffers
/// so the volume passes can reuse it every frame.
pub fn setup_static_light_frustum_mesh(light: &mut RefLight, device: &mut dyn GpuDevice) {
    if !light.is_static {
        return;
    }

    let mut mesh = tess_light(light);
    for vert in mesh.verts.iter_mut() {
        *vert = matrix_transform_point(&light.transform_matrix, vert);
    }

    mesh.vbo = Some(device.create_static_buffer(
        BufferKind::Vertex,
        bytemuck::cast_slice(&mesh.verts),
    ));
    mesh.ibo = Some(device.create_static_buffer(
        BufferKind::Index,
        bytemuck::cast_slice(&mesh.indexes),
    ));

    light.frustum_mesh = Some(mesh);
}

// ============================================================
// Culling
// ============================================================

pub fn cull_light_point(light: &RefLight, p: &Vec3) -> CullResult {
    for plane in light.frustum.iter() {
        if dot_product(p, &plane.normal) - plane.dist < 0.0 {
            return CullResult::Out;
        }
    }
    CullResult::In
}

pub fn cull_light_world_bounds(
    config: &RenderConfig,
    light: &RefLight,
    world_bounds: &[Vec3; 2],
) -> CullResult {
    if config.no_cull {
        return CullResult::Clip;
    }

    let mut any_clip = false;
    for plane in light.frustum.iter() {
        match box_on_plane_side(&world_bounds[0], &world_bounds[1], plane) {
            2 => return CullResult::Out,
            3 => any_clip = true,
            _ => {}
        }
    }

    if !any_clip {
        return CullResult::In;
    }
    CullResult::Clip
}

pub fn cull_light_triangle(
    config: &RenderConfig,
    light: &RefLight,
    verts: &[Vec3; 3],
) -> CullResult {
    if config.no_cull {
        return CullResult::Clip;
    }

    let mut mins = VEC3_ORIGIN;
    let mut maxs = VEC3_ORIGIN;
    clear_bounds(&mut mins, &mut maxs);
    for v in verts {
        add_point_to_bounds(v, &mut mins, &mut maxs);
    }

    cull_light_world_bounds(config, light, &[mins, maxs])
}

// ============================================================
// Scissor
// ============================================================

fn transform_world_to_window(world: &Vec3, view: &ViewParms) -> (f32, f32) {
    let eye = matrix_transform_vec4(&view.view_matrix, &[world[0], world[1], world[2], 1.0]);
    let clip = matrix_transform_vec4(&view.projection_matrix, &eye);

    let normalized = [clip[0] / clip[3], clip[1] / clip[3]];
    (
        0.5 * (1.0 + normalized[0]) * view.viewport_width as f32 + view.viewport_x as f32,
        0.5 * (1.0 + normalized[1]) * view.viewport_height as f32 + view.viewport_y as f32,
    )
}

fn add_point_to_light_scissor(light: &mut RefLight, world: &Vec3, view: &ViewParms) {
    let (wx, wy) = transform_world_to_window(world, view);

    light.scissor.coords[0] = light.scissor.coords[0].min(wx as i32);
    light.scissor.coords[2] = light.scissor.coords[2].max(wx as i32);
    light.scissor.coords[1] = light.scissor.coords[1].min(wy as i32);
    light.scissor.coords[3] = light.scissor.coords[3].max(wy as i32);
}

fn intersect_ray_plane(v1: &Vec3, v2: &Vec3, plane: &CPlane) -> Vec3 {
    let v = vector_subtract(v1, v2);
    let sect =
        -(dot_product(&plane.normal, v1) - plane.dist) / dot_product(&plane.normal, &v);
    vector_ma(v1, sect, &v)
}

/// Project one local-space edge of the light volume onto the scissor,
/// clipping against every view frustum plane first.
fn add_edge_to_light_scissor(
    light: &mut RefLight,
    local1: &Vec3,
    local2: &Vec3,
    view: &ViewParms,
    occlusion_query_available: bool,
) {
    for (i, frust) in view.frustum.iter().enumerate() {
        let mut world1 = matrix_transform_point(&light.transform_matrix, local1);
        let mut world2 = matrix_transform_point(&light.transform_matrix, local2);

        let side1 = dot_product(&frust.normal, &world1) - frust.dist >= 0.0;
        let side2 = dot_product(&frust.normal, &world2) - frust.dist >= 0.0;

        // an edge crossing the near plane means the scissor can't be
        // trusted for hardware occlusion queries
        if occlusion_query_available && i == FRUSTUM_NEAR && (!side1 || !side2) {
            light.no_occlusion_queries = true;
        }

        if !side1 && !side2 {
            continue; // edge behind plane
        }

        if !side1 || !side2 {
            let intersect = intersect_ray_plane(&world1, &world2, frust);
            if !side1 {
                world1 = intersect;
            } else {
                world2 = intersect;
            }
        }

        add_point_to_light_scissor(light, &world1, view);
        add_point_to_light_scissor(light, &world2, view);
    }
}

/// Screen-space rectangle covering the light volume. Falls back to the full
/// viewport when the volume clips the near plane, since the projection of a
/// volume crossing the eye plane cannot be bounded.
pub fn setup_light_scissor(
    light: &mut RefLight,
    view: &ViewParms,
    config: &RenderConfig,
    occlusion_query_available: bool,
) {
    light.scissor.coords[0] = view.viewport_x;
    light.scissor.coords[1] = view.viewport_y;
    light.scissor.coords[2] = view.viewport_x + view.viewport_width;
    light.scissor.coords[3] = view.viewport_y + view.viewport_height;

    light.clips_near_plane = box_on_plane_side(
        &light.world_bounds[0],
        &light.world_bounds[1],
        &view.frustum[FRUSTUM_NEAR],
    ) == 3;

    if occlusion_query_available {
        light.no_occlusion_queries = false;
    }

    // check if the light volume clips against the near plane
    if config.no_light_scissors || light.clips_near_plane {
        if occlusion_query_available {
            light.no_occlusion_queries = true;
        }
        return;
    }

    if !config.dynamic_light_scissors {
        // hundreds of lights can survive the PVS; the scissor cost can
        // outweigh the fill savings
        return;
    }

    light.scissor.coords[0] = 100_000_000;
    light.scissor.coords[1] = 100_000_000;
    light.scissor.coords[2] = -100_000_000;
    light.scissor.coords[3] = -100_000_000;

    match light.l.rl_type {
        RefLightType::Omni | RefLightType::Directional => {
            let bounds = light.local_bounds;
            let corner =
                |x: usize, y: usize, z: usize| -> Vec3 { [bounds[x][0], bounds[y][1], bounds[z][2]] };

            let edges: [(Vec3, Vec3); 12] = [
                // top plane
                (corner(1, 1, 1), corner(0, 1, 1)),
                (corner(1, 1, 1), corner(1, 0, 1)),
                (corner(0, 0, 1), corner(0, 1, 1)),
                (corner(0, 0, 1), corner(1, 0, 1)),
                // bottom plane
                (corner(1, 1, 0), corner(0, 1, 0)),
                (corner(1, 1, 0), corner(1, 0, 0)),
                (corner(0, 0, 0), corner(0, 1, 0)),
                (corner(0, 0, 0), corner(1, 0, 0)),
                // sides
                (corner(0, 1, 0), corner(0, 1, 1)),
                (corner(1, 1, 0), corner(1, 1, 1)),
                (corner(0, 0, 0), corner(0, 0, 1)),
                (corner(1, 0, 0), corner(1, 0, 1)),
            ];

            for (v1, v2) in edges.iter() {
                add_edge_to_light_scissor(light, v1, v2, view, occlusion_query_available);
            }
        }
        RefLightType::Proj => {
            let frustum = light.local_frustum;
            let far = calc_frustum_far_corners(&frustum);

            if !vector_compare(&light.l.proj_start, &VEC3_ORIGIN) {
                let near = calc_frustum_near_corners(&frustum);

                for j in 0..4 {
                    let k = (j + 1) % 4;
                    add_edge_to_light_scissor(light, &near[j], &far[j], view, occlusion_query_available);
                    add_edge_to_light_scissor(light, &far[j], &far[k], view, occlusion_query_available);
                    add_edge_to_light_scissor(light, &far[k], &near[k], view, occlusion_query_available);
                    add_edge_to_light_scissor(light, &near[k], &near[j], view, occlusion_query_available);
                }
            } else {
                let top = planes_get_intersection_point(
                    &frustum[FRUSTUM_LEFT],
                    &frustum[FRUSTUM_RIGHT],
                    &frustum[FRUSTUM_TOP],
                )
                .unwrap_or(VEC3_ORIGIN);

                for j in 0..4 {
                    add_edge_to_light_scissor(light, &far[j], &far[(j + 1) % 4], view, occlusion_query_available);
                    add_edge_to_light_scissor(light, &top, &far[j], view, occlusion_query_available);
                }
            }
        }
    }

    let x0 = view.viewport_x;
    let x1 = view.viewport_x + view.viewport_width;
    let y0 = view.viewport_y;
    let y1 = view.viewport_y + view.viewport_height;
    light.scissor.coords[0] = light.scissor.coords[0].clamp(x0, x1);
    light.scissor.coords[2] = light.scissor.coords[2].clamp(x0, x1);
    light.scissor.coords[1] = light.scissor.coords[1].clamp(y0, y1);
    light.scissor.coords[3] = light.scissor.coords[3].clamp(y0, y1);
}

// ============================================================
// Cube side culling
// ============================================================

/// Which faces of an omni light's shadow cube the caster can fall into.
/// Returns a 6-bit mask; all faces when cube shadows don't apply.
pub fn calc_light_cube_side_bits(
    config: &RenderConfig,
    pc: &mut PerfCounters,
    light: &RefLight,
    world_bounds: &[Vec3; 2],
) -> u8 {
    if light.l.rl_type != RefLightType::Omni
        || !config.shadows.shadow_mapping()
        || config.no_shadow_pyramids
    {
        return CUBESIDE_CLIPALL;
    }

    // a caster with no reach into the light volume casts into no face
    let mut closest = VEC3_ORIGIN;
    for i in 0..3 {
        closest[i] = light.origin[i].clamp(world_bounds[0][i], world_bounds[1][i]);
    }
    let to_box = vector_subtract(&closest, &light.origin);
    if vector_length(&to_box) > light.sphere_radius {
        pc.c_pyramid_tests += 1;
        return 0;
    }

    let mut cube_side_bits = 0u8;

    for cube_side in 0..6 {
        let angles: Vec3 = match cube_side {
            1 => [0.0, 180.0, 0.0],
            2 => [0.0, 90.0, 0.0],
            3 => [0.0, 270.0, 0.0],
            4 => [-90.0, 0.0, 0.0],
            5 => [90.0, 0.0, 0.0],
            _ => [0.0, 0.0, 0.0],
        };

        // view matrix from the light perspective, then into the OpenGL
        // coordinate system (looking down -Z)
        let rotation = matrix_from_angles(angles[0], angles[1], angles[2]);
        let transform = matrix_setup_transform_from_rotation(&rotation, &light.origin);
        let inverse = matrix_affine_inverse(&transform);
        let view_matrix = matrix_multiply(&QUAKE_TO_OPENGL_MATRIX, &inverse);

        // 90 degree square projection out to the light radius
        let z_near = 1.0;
        let z_far = light.sphere_radius;
        let x_max = z_near * (90.0f32.to_radians() / 2.0).tan();
        let projection =
            matrix_perspective_projection(-x_max, x_max, -x_max, x_max, z_near, z_far);

        let view_projection = matrix_multiply(&projection, &view_matrix);
        let frustum = setup_frustum_from_matrix(&view_projection);

        // cut off shadowmaps beyond the light volume; the far plane is
        // deliberately not tested
        let mut any_clip = false;
        let mut culled = false;
        for plane in frustum.iter().take(5) {
            match box_on_plane_side(&world_bounds[0], &world_bounds[1], plane) {
                2 => {
                    culled = true;
                    break;
                }
                3 => any_clip = true,
                _ => {}
            }
        }

        if !culled {
            if !any_clip {
                pc.c_pyramid_cull_ent_in += 1;
            } else {
                pc.c_pyramid_cull_ent_clip += 1;
            }
            cube_side_bits |= 1 << cube_side;
        } else {
            pc.c_pyramid_cull_ent_out += 1;
        }
    }

    pc.c_pyramid_tests += 1;

    cube_side_bits
}

// ============================================================
// Shadow LOD
// ============================================================

/// Screen-space radius of a sphere, 0.0 when it reaches the near plane.
pub fn project_radius(radius: f32, location: &Vec3, view: &ViewParms) -> f32 {
    let eye = matrix_transform_point(&view.view_matrix, location);
    let depth = -eye[2];
    if depth <= radius + 1.0 {
        return 0.0;
    }
    (view.projection_matrix[5] * radius / depth).min(1.0)
}

pub fn setup_light_lod(light: &mut RefLight, view: &ViewParms, config: &RenderConfig) {
    if light.l.no_shadows {
        light.shadow_lod = -1;
        return;
    }

    // projected bounding sphere drives the LOD selection
    let projected_radius = project_radius(light.sphere_radius, &light.l.origin, view);

    let mut flod = if projected_radius != 0.0 {
        let lodscale = config.shadow_lod_scale.min(20.0);
        1.0 - projected_radius * lodscale
    } else {
        // intersects the near view plane, e.g. a carried light
        0.0
    };

    flod *= SHADOW_LOD_NUM_LODS as f32;
    let mut lod = flod as i32;

    if lod < 0 {
        lod = 0;
    }
    lod += config.shadow_lod_bias;

    if lod < 0 {
        lod = 0;
    }
    if lod >= SHADOW_LOD_NUM_LODS {
        // don't draw any shadow
        lod = -1;
    }

    // never give ultra quality to point lights
    if lod == 0 && light.l.rl_type == RefLightType::Omni {
        lod = 1;
    }

    light.shadow_lod = lod;
}

// ============================================================
// Interaction gathering
// ============================================================

/// Record that `surface` is lit and/or shadowed by `light` this frame.
/// Returns false for surfaces the lighting passes ignore entirely.
#[allow(clippy::too_many_arguments)]
pub fn add_light_interaction(
    pc: &mut PerfCounters,
    arena: &mut InteractionArena,
    light_index: usize,
    light: &mut RefLight,
    entity: Option<usize>,
    surface: u32,
    shader: &SurfaceShaderFlags,
    cube_side_bits: u8,
    ia_type: InteractionType,
) -> bool {
    // skip all surfaces that don't matter for the lighting-only pass
    if shader.is_sky || (!shader.interact_light && shader.no_shadows) {
        return false;
    }

    let ia_index = arena.push(Interaction {
        light: light_index,
        entity,
        surface,
        shader_num: shader.sorted_index,
        ia_type,
        cube_side_bits,
        scissor: light.scissor,
        no_occlusion_queries: light.no_occlusion_queries,
        next: -1,
    });

    light.no_sort = ia_index == 0;

    // connect to the light's list
    if light.first_interaction < 0 {
        light.first_interaction = ia_index as i32;
    }
    if light.last_interaction >= 0 {
        arena.get_mut(light.last_interaction as usize).next = ia_index as i32;
    }
    light.last_interaction = ia_index as i32;

    light.num_interactions += 1;
    if !ia_type.contains(InteractionType::LIGHT) {
        light.num_shadow_only_interactions += 1;
    }
    if !ia_type.intersects(InteractionType::SHADOW | InteractionType::SHADOWCLIP) {
        light.num_light_only_interactions += 1;
    }

    if light.is_static {
        pc.c_slight_interactions += 1;
    } else {
        pc.c_dlight_interactions += 1;
    }

    true
}

/// Sort a light's interactions by shader, then world-entity-first, then
/// entity, so the render backend can batch geometry.
pub fn sort_interactions(config: &RenderConfig, arena: &mut InteractionArena, light: &mut RefLight) {
    if config.no_interaction_sort {
        return;
    }
    if light.num_interactions == 0 || light.no_sort {
        return;
    }

    let first = light.first_interaction as usize;
    let count = light.num_interactions as usize;
    if first + count > arena.len() {
        // wrapped around the arena; the slice is not contiguous
        return;
    }

    let slice = &mut arena.interactions[first..first + count];
    slice.sort_by(|a, b| {
        a.shader_num
            .cmp(&b.shader_num)
            .then_with(|| a.entity.is_some().cmp(&b.entity.is_some()))
            .then_with(|| a.entity.cmp(&b.entity))
    });

    // fix the linked list
    for i in 0..count {
        let next = if i + 1 < count { (first + i + 1) as i32 } else { -1 };
        arena.interactions[first + i].next = next;
    }
    light.first_interaction = first as i32;
    light.last_interaction = (first + count - 1) as i32;
}

/// Determine which surfaces of a brush model entity interact with a light.
#[allow(clippy::too_many_arguments)]
pub fn add_brush_model_interactions(
    pc: &mut PerfCounters,
    config: &RenderConfig,
    arena: &mut InteractionArena,
    light_index: usize,
    light: &mut RefLight,
    entity: usize,
    entity_world_bounds: &[Vec3; 2],
    entity_culled_out: bool,
    surfaces: &[EntitySurface],
    mut ia_type: InteractionType,
) {
    // a model outside the view frustum can still cast a shadow into it
    if entity_culled_out {
        ia_type.remove(InteractionType::LIGHT);
    }
    if ia_type.is_empty() {
        return;
    }

    // quick AABB cull
    if !bounds_intersect(
        &light.world_bounds[0],
        &light.world_bounds[1],
        &entity_world_bounds[0],
        &entity_world_bounds[1],
    ) {
        pc.c_dlight_surfaces_culled += surfaces.len() as u32;
        return;
    }

    // a more expensive and precise light frustum cull
    if !config.no_light_frustums
        && cull_light_world_bounds(config, light, entity_world_bounds) == CullResult::Out
    {
        pc.c_dlight_surfaces_culled += surfaces.len() as u32;
        return;
    }

    let cube_side_bits = calc_light_cube_side_bits(config, pc, light, entity_world_bounds);

    for surf in surfaces {
        if add_light_interaction(
            pc,
            arena,
            light_index,
            light,
            Some(entity),
            surf.surface,
            &surf.shader,
            cube_side_bits,
            ia_type,
        ) {
            pc.c_dlight_surfaces += 1;
        }
    }
}

// ============================================================
// Light grid sampling
// ============================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct GridPoint {
    pub ambient_color: Vec3,
    pub directed_color: Vec3,
    pub direction: Vec3,
}

/// Precomputed ambient light volume of the world.
#[derive(Debug, Clone)]
pub struct LightGrid {
    pub origin: Vec3,
    pub inverse_size: Vec3,
    pub bounds: [i32; 3],
    pub points: Vec<GridPoint>,
}

/// Ambient and directed light arriving at a point.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityLight {
    pub ambient: Vec3,
    pub directed: Vec3,
    pub dir: Vec3,
}

/// Scale dim light colors up to a floor instead of letting them wash out to
/// black.
pub fn force_ambient_light(light: &mut Vec3, min_light: f32) {
    let mut len = vector_length(light);
    if min_light <= 0.0 || len >= min_light {
        return;
    }

    for channel in light.iter_mut() {
        if *channel < 0.01 {
            *channel = 0.01;
        }
    }
    if len < 0.01 {
        len = 0.01;
    }
    *light = vector_scale(light, min_light / len);
}

/// Used when the light grid is missing or sampled inside a wall, and for
/// the menu scene.
pub fn fallback_light(identity_light: f32) -> EntityLight {
    let mut dir = [-1.0, 1.0, 1.25];
    vector_normalize(&mut dir);
    EntityLight {
        ambient: [
            identity_light * (64.0 / 255.0),
            identity_light * (64.0 / 255.0),
            identity_light * (96.0 / 255.0),
        ],
        directed: [
            identity_light * (255.0 / 255.0),
            identity_light * (232.0 / 255.0),
            identity_light * (224.0 / 255.0),
        ],
        dir,
    }
}

impl LightGrid {
    fn point(&self, x: i32, y: i32, z: i32) -> &GridPoint {
        let step_y = self.bounds[0] as usize;
        let step_z = (self.bounds[0] * self.bounds[1]) as usize;
        &self.points[x as usize + y as usize * step_y + z as usize * step_z]
    }

    /// Trilinearly interpolate the grid at a world position. Samples inside
    /// walls (zero ambient) and out-of-bounds cells are skipped and the
    /// remaining weights renormalized.
    pub fn sample(&self, origin: &Vec3, config: &RenderConfig, identity_light: f32) -> EntityLight {
        let local = vector_subtract(origin, &self.origin);

        let mut pos = [0i32; 3];
        let mut frac = [0f32; 3];
        for i in 0..3 {
            let v = local[i] * self.inverse_size[i];
            pos[i] = v.floor() as i32;
            frac[i] = v - pos[i] as f32;

            if pos[i] < 0 {
                pos[i] = 0;
                frac[i] = 0.0;
            } else if pos[i] >= self.bounds[i] - 1 {
                pos[i] = self.bounds[i] - 2;
                frac[i] = 1.0;
            }
        }

        let mut out = EntityLight {
            // face down when nothing contributes
            dir: [0.0, 0.0, -0.01],
            ..Default::default()
        };

        let mut total_factor = 0.0f32;
        for x in pos[0]..=pos[0] + 1 {
            if x < 0 || x > self.bounds[0] - 1 {
                continue;
            }
            for y in pos[1]..=pos[1] + 1 {
                if y < 0 || y > self.bounds[1] - 1 {
                    continue;
                }
                for z in pos[2]..=pos[2] + 1 {
                    if z < 0 || z > self.bounds[2] - 1 {
                        continue;
                    }

                    let grid_point = self.point(x, y, z);
                    if vector_compare(&grid_point.ambient_color, &VEC3_ORIGIN) {
                        continue; // sample in wall
                    }

                    let mut factor = 1.0f32;
                    factor *= if x == pos[0] + 1 { frac[0] } else { 1.0 - frac[0] };
                    factor *= if y == pos[1] + 1 { frac[1] } else { 1.0 - frac[1] };
                    factor *= if z == pos[2] + 1 { frac[2] } else { 1.0 - frac[2] };

                    total_factor += factor;
                    for i in 0..3 {
                        out.ambient[i] += factor * grid_point.ambient_color[i];
                        out.directed[i] += factor * grid_point.directed_color[i];
                    }
                    out.dir = vector_ma(&out.dir, factor, &grid_point.direction);
                }
            }
        }

        if total_factor > 0.0 && total_factor < 0.99 {
            let total_factor = 1.0 / total_factor;
            out.ambient = vector_scale(&out.ambient, total_factor);
            out.directed = vector_scale(&out.directed, total_factor);
        }

        let src_dir = out.dir;
        let mut dir = VEC3_ORIGIN;
        vector_normalize2(&src_dir, &mut dir);
        out.dir = dir;

        if vector_compare(&out.ambient, &VEC3_ORIGIN) {
            return fallback_light(identity_light);
        }

        force_ambient_light(&mut out.ambient, config.force_ambient);
        force_ambient_light(&mut out.directed, config.force_ambient);

        if config.light_grid_mul_directed != 0.0 {
            out.directed = vector_scale(&out.directed, config.light_grid_mul_directed);
        }
        if config.light_grid_mul_ambient != 0.0 {
            out.ambient = vector_scale(&out.ambient, config.light_grid_mul_ambient);
        }

        out
    }
}

/// Lighting values for an entity at `origin`. Falls back to a fixed studio
/// light without a world grid (menu scenes).
pub fn setup_entity_lighting(
    grid: Option<&LightGrid>,
    config: &RenderConfig,
    identity_light: f32,
    origin: &Vec3,
) -> EntityLight {
    match grid {
        Some(grid) => grid.sample(origin, config, identity_light),
        None => fallback_light(identity_light),
    }
}

//! Camera parameters and the world transform handed to every tile.
//!
//! Matrices are 4x4, column-major, stored as `[f64; 16]` (the translation
//! lives in elements 12..15).

use serde::{Deserialize, Serialize};

/// Column-major 4x4 matrix.
pub type Mat4 = [f64; 16];

pub const IDENTITY: Mat4 = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Projection {
    #[default]
    Perspective,
    Orthographic,
}

/// Camera settings copied verbatim into every render task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraParams {
    /// World-space position (x, y, z)
    pub position: [f64; 3],
    /// Rotation around the x, y and z axes in degrees
    pub rotation_degrees: [f64; 3],
    pub projection: Projection,
    /// Vertical field of view in degrees (perspective only)
    pub field_of_view: f64,
    /// Half-extent of the view volume (orthographic only)
    pub orthographic_size: f64,
    pub projection_plane_distance: f64,
    /// Samples per pixel; also the pass count in incremental mode
    pub rays_per_pixel: u32,
}

impl Default for CameraParams {
    fn default() -> Self {
        Self {
            position: [-0.225, 2.55, 6.0],
            rotation_degrees: [0.0, 0.0, 0.0],
            projection: Projection::Perspective,
            field_of_view: 45.0,
            orthographic_size: 3.0,
            projection_plane_distance: 0.01,
            rays_per_pixel: 10,
        }
    }
}

impl CameraParams {
    /// Camera-to-world transform: `T(position) * Rx * Ry * Rz`.
    pub fn transform(&self) -> Mat4 {
        let [x, y, z] = self.position;
        let [rx, ry, rz] = self.rotation_degrees.map(f64::to_radians);

        let mut m = translate(x, y, z);
        m = multiply(&m, &rotate_x(rx));
        m = multiply(&m, &rotate_y(ry));
        multiply(&m, &rotate_z(rz))
    }
}

pub fn translate(x: f64, y: f64, z: f64) -> Mat4 {
    let mut m = IDENTITY;
    m[12] = x;
    m[13] = y;
    m[14] = z;
    m
}

pub fn rotate_x(a: f64) -> Mat4 {
    let (s, c) = a.sin_cos();
    [
        1.0, 0.0, 0.0, 0.0, //
        0.0, c, s, 0.0, //
        0.0, -s, c, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]
}

pub fn rotate_y(a: f64) -> Mat4 {
    let (s, c) = a.sin_cos();
    [
        c, 0.0, -s, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        s, 0.0, c, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]
}

pub fn rotate_z(a: f64) -> Mat4 {
    let (s, c) = a.sin_cos();
    [
        c, s, 0.0, 0.0, //
        -s, c, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]
}

/// Column-major product `a * b`.
pub fn multiply(a: &Mat4, b: &Mat4) -> Mat4 {
    let mut out = [0.0; 16];
    for col in 0..4 {
        for row in 0..4 {
            out[col * 4 + row] = (0..4).map(|k| a[k * 4 + row] * b[col * 4 + k]).sum();
        }
    }
    out
}

/// Transform a point (w = 1) by a column-major matrix.
pub fn transform_point(m: &Mat4, p: [f64; 3]) -> [f64; 3] {
    let v = [p[0], p[1], p[2], 1.0];
    let mut out = [0.0; 3];
    for (row, slot) in out.iter_mut().enumerate() {
        *slot = (0..4).map(|k| m[k * 4 + row] * v[k]).sum();
    }
    out
}

use nalgebra::{Matrix3, Matrix4, Rotation3, Translation3, Vector3};

/// Rigid transform as OpenCV reports it: axis-angle rotation and translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub rvec: Vector3<f64>,
    pub tvec: Vector3<f64>,
}

impl Pose {
    pub const fn new(rvec: Vector3<f64>, tvec: Vector3<f64>) -> Self {
        Self { rvec, tvec }
    }

    pub fn rotation(&self) -> Rotation3<f64> {
        Rotation3::from_scaled_axis(self.rvec)
    }

    pub fn to_matrix(&self) -> Matrix4<f64> {
        homogeneous(self.rotation().matrix(), &self.tvec)
    }

    /// Reads the rotation back out of the upper-left block, which is assumed orthonormal.
    pub fn from_matrix(m: &Matrix4<f64>) -> Self {
        let r: Matrix3<f64> = m.fixed_view::<3, 3>(0, 0).into_owned();
        let rotation = Rotation3::from_matrix_unchecked(r);

        Self {
            rvec: rotation.scaled_axis(),
            tvec: m.fixed_view::<3, 1>(0, 3).into_owned(),
        }
    }
}

impl std::fmt::Display for Pose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "r=({:.4}, {:.4}, {:.4}) t=({:.4}, {:.4}, {:.4})",
            self.rvec.x, self.rvec.y, self.rvec.z, self.tvec.x, self.tvec.y, self.tvec.z
        )
    }
}

/// Fixed transform from the board frame to the object frame.
///
/// Rotation is given as x, y, z angles in degrees and applied as
/// `Rz * Ry * Rx`; translation is in board units (metres).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidOffset {
    pub rotation_deg: [f64; 3],
    pub translation: [f64; 3],
}

impl RigidOffset {
    pub const fn new(rotation_deg: [f64; 3], translation: [f64; 3]) -> Self {
        Self {
            rotation_deg,
            translation,
        }
    }

    pub fn to_matrix(&self) -> Matrix4<f64> {
        let [rx, ry, rz] = self.rotation_deg.map(f64::to_radians);
        let rotation = Rotation3::from_euler_angles(rx, ry, rz);

        homogeneous(rotation.matrix(), &Vector3::from(self.translation))
    }

    /// Object pose in camera space for a board seen at `board`.
    pub fn compose(&self, board: &Pose) -> Matrix4<f64> {
        board.to_matrix() * self.to_matrix()
    }
}

fn homogeneous(rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> Matrix4<f64> {
    let mut m = Translation3::from(*translation).to_homogeneous();
    m.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation);
    m
}

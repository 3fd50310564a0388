//! Synthetic three-camera capture scene

use mocap_pipeline::calibration::CalibrationBundle;
use mocap_pipeline::detect::detector::{Landmark, LandmarkFrame};
use mocap_pipeline::schema::BODY_POINT_COUNT;
use nalgebra::Vector3;

pub const IMAGE_WIDTH: u32 = 1280;
pub const IMAGE_HEIGHT: u32 = 720;

/// Three undistorted cameras 2.5 m from the origin, turned about y
pub const SCENE_CALIBRATION_TOML: &str = r#"
[cam_0]
name = "left"
size = [1280, 720]
matrix = [[1000.0, 0.0, 640.0], [0.0, 1000.0, 360.0], [0.0, 0.0, 1.0]]
distortions = [0.0, 0.0, 0.0, 0.0, 0.0]
rotation = [0.0, -0.3, 0.0]
translation = [0.0, 0.0, 2500.0]

[cam_1]
name = "center"
size = [1280, 720]
matrix = [[1000.0, 0.0, 640.0], [0.0, 1000.0, 360.0], [0.0, 0.0, 1.0]]
distortions = [0.0, 0.0, 0.0, 0.0, 0.0]
rotation = [0.0, 0.0, 0.0]
translation = [0.0, 0.0, 2500.0]

[cam_2]
name = "right"
size = [1280, 720]
matrix = [[1000.0, 0.0, 640.0], [0.0, 1000.0, 360.0], [0.0, 0.0, 1.0]]
distortions = [0.0, 0.0, 0.0, 0.0, 0.0]
rotation = [0.0, 0.3, 0.0]
translation = [0.0, 0.0, 2500.0]
"#;

pub fn scene_bundle() -> CalibrationBundle {
    CalibrationBundle::from_toml_str(SCENE_CALIBRATION_TOML).unwrap()
}

/// Ground-truth position (mm) of body landmark `point` at `frame`
pub fn body_point(frame: usize, point: usize) -> [f64; 3] {
    let t = frame as f64 / 30.0;
    [
        (point % 6) as f64 * 80.0 - 200.0 + 50.0 * t.sin(),
        (point / 6) as f64 * 90.0 - 250.0,
        100.0 + (point % 3) as f64 * 40.0,
    ]
}

/// Body landmarks of the scene as seen by camera `camera`
pub fn landmark_frames(bundle: &CalibrationBundle, camera: usize, frames: usize) -> Vec<LandmarkFrame> {
    let model = &bundle.cameras[camera];
    (0..frames)
        .map(|frame| {
            let body = (0..BODY_POINT_COUNT)
                .map(|point| {
                    let [x, y, z] = body_point(frame, point);
                    let pixel = model.project(&Vector3::new(x, y, z));
                    Landmark {
                        x: pixel.x / IMAGE_WIDTH as f64,
                        y: pixel.y / IMAGE_HEIGHT as f64,
                        visibility: Some(0.99),
                    }
                })
                .collect();
            LandmarkFrame {
                body: Some(body),
                ..LandmarkFrame::default()
            }
        })
        .collect()
}

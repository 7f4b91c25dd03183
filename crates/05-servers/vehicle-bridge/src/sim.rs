//! Built-in deterministic road/vehicle simulator.
//!
//! A stand-in for the external driving simulator: a straight two-lane road
//! along world +x, a kinematic bicycle model, and a pinhole projection of
//! the lane markings into the camera frame. Good enough to close the loop
//! for demos and integration tests without any external process.

use crate::{VehicleAdapter, VehiclePose};
use messages::{CameraConfig, ImageBuf};

const WHEELBASE_M: f64 = 2.7;
const MAX_STEER_RAD: f64 = 0.61; // ~35 degrees at full lock
const MAX_ACCEL: f64 = 4.0;
const MAX_BRAKE: f64 = 8.0;
const DRAG: f64 = 0.3;
const LANE_HALF_WIDTH_M: f64 = 1.85;
const MARKING_WIDTH_M: f64 = 0.15;
const RENDER_RANGE_M: f64 = 80.0;
const RENDER_STEP_M: f64 = 0.25;

const SKY: [u8; 3] = [150, 180, 210];
const ASPHALT: [u8; 3] = [45, 45, 48];
const MARKING: [u8; 3] = [235, 235, 235];

/// Simulated vehicle on an infinite straight road.
pub struct SimVehicle {
    camera: CameraConfig,
    spawn: VehiclePose,
    pose: VehiclePose,
    steering: f64,
    throttle: f64,
    brake: f64,
    focal_px: f64,
    horizon_row: f64,
    cam_height: f64,
}

impl SimVehicle {
    /// Spawns at the lane center with the given initial speed.
    pub fn new(camera: &CameraConfig, initial_speed: f64) -> Self {
        let spawn = VehiclePose {
            velocity: initial_speed,
            ..VehiclePose::default()
        };
        let focal_px = camera.width as f64 / 2.0 / (camera.fov as f64 / 2.0).to_radians().tan();
        Self {
            camera: camera.clone(),
            spawn,
            pose: spawn,
            steering: 0.0,
            throttle: 0.0,
            brake: 0.0,
            focal_px,
            horizon_row: camera.height as f64 / 2.0,
            cam_height: camera.position[2].max(0.5) as f64,
        }
    }

    /// Spawns with a lateral offset from the lane center, e.g. to exercise
    /// the controller's correction.
    pub fn with_lateral_offset(mut self, offset_m: f64) -> Self {
        self.spawn.y = offset_m;
        self.pose = self.spawn;
        self
    }

    fn paint_background(&self, frame: &mut ImageBuf) {
        let horizon = self.horizon_row as u32;
        for y in 0..frame.height() {
            let color = if y < horizon { SKY } else { ASPHALT };
            for x in 0..frame.width() {
                frame.put_pixel(x, y, color);
            }
        }
    }

    /// Projects the two lane markings into the frame by marching forward
    /// along the road and plotting each sample with distance-scaled width.
    fn paint_markings(&self, frame: &mut ImageBuf) {
        let (sin_yaw, cos_yaw) = self.pose.yaw.sin_cos();
        let half_w = frame.width() as f64 / 2.0;

        for lane_y in [-LANE_HALF_WIDTH_M, LANE_HALF_WIDTH_M] {
            let mut forward = 1.0;
            while forward < RENDER_RANGE_M {
                // World point on the marking, relative to the vehicle.
                let dx = forward;
                let dy = lane_y - self.pose.y;
                // Into the camera frame (vehicle yaw rotates the view).
                let f = dx * cos_yaw + dy * sin_yaw;
                let s = -dx * sin_yaw + dy * cos_yaw;
                forward += RENDER_STEP_M;
                if f < 1.0 {
                    continue;
                }

                let row = self.horizon_row + self.focal_px * self.cam_height / f;
                let col = half_w + self.focal_px * s / f;
                if row < 0.0 || row >= frame.height() as f64 {
                    continue;
                }

                let thickness = ((self.focal_px * MARKING_WIDTH_M / f) / 2.0).clamp(1.0, 6.0) as i32;
                let (row, col) = (row as i32, col as i32);
                for d in -thickness..=thickness {
                    let x = col + d;
                    if x >= 0 {
                        frame.put_pixel(x as u32, row as u32, MARKING);
                    }
                }
            }
        }
    }
}

impl VehicleAdapter for SimVehicle {
    fn tick(&mut self, dt: f64) {
        let steer_angle = self.steering * MAX_STEER_RAD;
        let v = self.pose.velocity;

        self.pose.yaw += v / WHEELBASE_M * steer_angle.tan() * dt;
        self.pose.x += v * self.pose.yaw.cos() * dt;
        self.pose.y += v * self.pose.yaw.sin() * dt;

        let accel = self.throttle * MAX_ACCEL - self.brake * MAX_BRAKE - DRAG * v;
        self.pose.velocity = (v + accel * dt).max(0.0);
    }

    fn capture_frame(&mut self, frame: &mut ImageBuf) -> bool {
        debug_assert_eq!(frame.width(), self.camera.width);
        debug_assert_eq!(frame.height(), self.camera.height);
        self.paint_background(frame);
        self.paint_markings(frame);
        true
    }

    fn apply_control(&mut self, steering: f32, throttle: f32, brake: f32) {
        self.steering = steering as f64;
        self.throttle = throttle as f64;
        self.brake = brake as f64;
    }

    fn pose(&self) -> VehiclePose {
        self.pose
    }

    fn respawn(&mut self) {
        self.pose = self.spawn;
        self.steering = 0.0;
        self.throttle = 0.0;
        self.brake = 0.0;
    }
}

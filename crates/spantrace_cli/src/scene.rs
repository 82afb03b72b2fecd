//! The demo world: a glass-cased light, a diffuse ball and a lens inside a
//! sky box.

use std::f32::consts::FRAC_PI_2;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use spantrace_core::Material;
use spantrace_math::{Color, Mat4, Vec3};
use spantrace_renderer::{lens, union_all, Intersection, Object, Plane, Sphere, Union};

/// Half the edge length of the sky box.
const SKY_DISTANCE: f32 = 200.0;

fn sky_material(skybox: Option<&Path>) -> Result<Material> {
    let sky = match skybox {
        Some(dir) => Material::skybox(dir).with_context(|| format!("Loading sky box from {}", dir.display()))?,
        // Flat pale-blue sky
        None => Material::emitter(Color::rgb(0.55, 0.65, 0.8)),
    };
    Ok(sky.transform(&Mat4::from_rotation_y(FRAC_PI_2)))
}

pub fn demo_world(skybox: Option<&Path>) -> Result<Box<dyn Object>> {
    let sky = sky_material(skybox)?;
    let glass = Arc::new(Material::glass(0.7, 0.9, 1.3));
    let diffuse_white = Arc::new(Material::diffuse(Color::gray(0.8)));
    let lamp = Arc::new(Material::emitter(Color::gray(2.0)).transform(&Mat4::from_translation(Vec3::new(-1.0, 0.0, 4.0))));
    let sky_ball = Arc::new(sky.transform(&Mat4::from_translation(Vec3::new(-1.0, 0.0, 4.0))));
    let sky = Arc::new(sky);

    let light_pos = Vec3::new(1.0, 0.0, -4.0);
    let mut objects: Vec<Box<dyn Object>> = vec![
        Box::new(Sphere::new(light_pos, 0.2, sky_ball)),
        // Lamp inside a glass ball sliced open on one side
        Box::new(Intersection::new(
            Box::new(Sphere::new(light_pos, 1.0, glass.clone())),
            Box::new(Union::new(
                Box::new(Plane::through(Vec3::new(-1.0, 0.0, -0.7), light_pos, glass.clone())),
                Box::new(Sphere::new(light_pos, 0.2, lamp)),
            )),
        )),
        Box::new(Sphere::new(Vec3::new(-1.0, 0.0, -4.0), 0.2, diffuse_white)),
    ];

    for normal in [Vec3::NEG_Z, Vec3::Z, Vec3::NEG_Y, Vec3::Y, Vec3::X, Vec3::NEG_X] {
        objects.push(Box::new(Plane::new(normal, SKY_DISTANCE, sky.clone())));
    }

    objects.push(lens(Vec3::new(-2.5 / 4.0, 0.0, -2.5), Vec3::new(-1.0, 0.0, -4.0), 0.5, 1.0, glass)?);

    log::info!("Built demo world with {} top-level objects", objects.len());
    Ok(union_all(objects))
}

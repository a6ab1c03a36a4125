use bevy::diagnostic::{DiagnosticsStore, FrameTimeDiagnosticsPlugin};
use bevy::prelude::*;
use bevy::render::extract_resource::{ExtractResource, ExtractResourcePlugin};
use bevy::render::render_asset::{RenderAssetUsages, RenderAssets};
use bevy::render::render_resource::{
    AsBindGroup, CommandEncoderDescriptor, Extent3d, ShaderRef, TextureDimension, TextureFormat,
    TextureUsages,
};
use bevy::render::renderer::{RenderDevice, RenderQueue};
use bevy::render::texture::GpuImage;
use bevy::render::{Render, RenderApp, RenderSet};
use bevy::sprite::{Material2d, Material2dPlugin};
use slime_trail::gpu::host::{DisplaySurface, RenderDeviceHost};
use slime_trail::{
    EnvironmentMap, SlimeConfig, SlimeEnvironment, SlimePlugin, SlimeRuntime, SlimeStats,
};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

fn main() {
    let mut app = App::new();
    app.add_plugins((
        DefaultPlugins,
        FrameTimeDiagnosticsPlugin::default(),
        Material2dPlugin::<TrailMaterial>::default(),
        ExtractResourcePlugin::<DisplayFeed>::default(),
    ))
    // 200k particles, the default 20 ms tick
    .insert_resource(SlimeConfig::new(WIDTH, HEIGHT, 200_000))
    .insert_resource(SlimeEnvironment(ring_obstacle()))
    .add_plugins(SlimePlugin)
    .add_systems(Startup, setup)
    .add_systems(Update, (attach_surface, log_stats, exit_on_escape));

    app.sub_app_mut(RenderApp)
        .add_systems(Render, copy_display.in_set(RenderSet::PrepareResources));

    app.run();
}

#[derive(Asset, TypePath, AsBindGroup, Clone)]
struct TrailMaterial {
    #[texture(0, sample_type = "float", filterable = false)]
    field: Handle<Image>,
}

impl Material2d for TrailMaterial {
    fn fragment_shader() -> ShaderRef {
        "shaders/slime_display.wgsl".into()
    }
}

// the image the quad samples, and the simulation surface copied into it
#[derive(Resource, Clone, ExtractResource)]
struct DisplayFeed {
    image: Handle<Image>,
    surface: Option<DisplaySurface>,
}

fn setup(
    mut commands: Commands,
    mut images: ResMut<Assets<Image>>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<TrailMaterial>>,
) {
    let mut image = Image::new_fill(
        Extent3d {
            width: WIDTH,
            height: HEIGHT,
            depth_or_array_layers: 1,
        },
        TextureDimension::D2,
        &0.0f32.to_ne_bytes(),
        TextureFormat::R32Float,
        RenderAssetUsages::RENDER_WORLD,
    );
    image.texture_descriptor.usage = TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST;
    let image = images.add(image);

    commands.spawn(Camera2d);
    commands.spawn((
        Mesh2d(meshes.add(Rectangle::new(WIDTH as f32, HEIGHT as f32))),
        MeshMaterial2d(materials.add(TrailMaterial {
            field: image.clone(),
        })),
    ));
    commands.insert_resource(DisplayFeed {
        image,
        surface: None,
    });
}

fn attach_surface(
    runtime: Option<Res<SlimeRuntime<RenderDeviceHost>>>,
    feed: Option<ResMut<DisplayFeed>>,
) {
    let (Some(runtime), Some(mut feed)) = (runtime, feed) else {
        return;
    };
    if !runtime.resources().is_live() {
        if feed.surface.is_some() {
            feed.surface = None;
        }
        return;
    }
    if feed.surface.is_none() {
        feed.surface = runtime.display_surface();
        if feed.surface.is_some() {
            info!("slime display attached");
        }
    }
}

// render world: the display surface and the quad's image share size and format
fn copy_display(
    feed: Option<Res<DisplayFeed>>,
    images: Res<RenderAssets<GpuImage>>,
    device: Res<RenderDevice>,
    queue: Res<RenderQueue>,
) {
    let Some(feed) = feed else { return };
    let Some(surface) = &feed.surface else { return };
    let Some(target) = images.get(&feed.image) else {
        return;
    };

    let mut encoder = device.create_command_encoder(&CommandEncoderDescriptor {
        label: Some("slime_display_copy"),
    });
    encoder.copy_texture_to_texture(
        surface.texture.as_image_copy(),
        target.texture.as_image_copy(),
        target.size,
    );
    queue.submit([encoder.finish()]);
}

// a solid ring around the spawn disc, with a gap on the right
fn ring_obstacle() -> EnvironmentMap {
    let center = Vec2::new(WIDTH as f32, HEIGHT as f32) * 0.5;
    let inner = HEIGHT as f32 * 0.42;
    let outer = inner + 12.0;

    let mut texels = Vec::with_capacity((WIDTH * HEIGHT) as usize);
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            let offset = Vec2::new(x as f32, y as f32) - center;
            let on_ring = (inner..outer).contains(&offset.length());
            let gap = offset.x > 0.0 && offset.y.abs() < 40.0;
            texels.push(if on_ring && !gap { 1.0 } else { 0.0 });
        }
    }
    EnvironmentMap::new(WIDTH, HEIGHT, texels).unwrap()
}

fn exit_on_escape(keys: Res<ButtonInput<KeyCode>>, mut exit: EventWriter<AppExit>) {
    if keys.just_pressed(KeyCode::Escape) {
        exit.write(AppExit::Success);
    }
}

fn log_stats(diagnostics: Res<DiagnosticsStore>, stats: Res<SlimeStats>, mut counter: Local<u32>) {
    *counter += 1;
    if *counter >= 120 {
        *counter = 0;

        let fps = diagnostics
            .get(&FrameTimeDiagnosticsPlugin::FPS)
            .and_then(|d| d.average())
            .unwrap_or_default();
        info!(
            "==== {:.1} FPS, {} ticks, {} frames presented ====",
            fps, stats.ticks, stats.presented
        );
    }
}

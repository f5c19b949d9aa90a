// wgpu stereo renderer
// Two eye textures, one oversized fullscreen triangle per eye

use super::{RenderState, RendererError, eye_viewports};
use crate::decoder::StereoImage;
use std::sync::Arc;

/// WGSL shading program. The vertex stage emits a single triangle whose
/// vertices extend beyond normalized device coordinates, so one draw call
/// covers the active viewport with no seam or gap. No projection or lens
/// warp is applied: rendering is a flat full-viewport pass-through.
const STEREO_SHADER: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) tex_coord: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    var positions = array<vec2<f32>, 3>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(3.0, -1.0),
        vec2<f32>(-1.0, 3.0),
    );
    var tex_coords = array<vec2<f32>, 3>(
        vec2<f32>(0.0, 1.0),
        vec2<f32>(2.0, 1.0),
        vec2<f32>(0.0, -1.0),
    );

    var output: VertexOutput;
    output.position = vec4<f32>(positions[vertex_index], 0.0, 1.0);
    output.tex_coord = tex_coords[vertex_index];
    return output;
}

@group(0) @binding(0) var eye_texture: texture_2d<f32>;
@group(0) @binding(1) var eye_sampler: sampler;

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(eye_texture, eye_sampler, input.tex_coord);
}
"#;

/// GPU objects for one eye. Reallocated only on a dimension change,
/// otherwise re-uploaded in place every frame.
struct EyeTexture {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
}

pub struct StereoRenderer {
    state: RenderState,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: Option<wgpu::Surface<'static>>,
    surface_config: Option<wgpu::SurfaceConfiguration>,

    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,

    left_eye: Option<EyeTexture>,
    right_eye: Option<EyeTexture>,
    eye_width: u32,
    eye_height: u32,

    clear_color: wgpu::Color,
    last_uploaded: Option<u32>,
}

impl StereoRenderer {
    /// Create the renderer bound to the host window.
    ///
    /// Walks `Uninitialized -> ContextReady -> ProgramReady`. Context or
    /// surface acquisition failure and shading-program validation failure
    /// are both fatal for the session.
    pub async fn new_with_surface(
        window: Arc<winit::window::Window>,
        clear_color: [f64; 4],
    ) -> Result<Self, RendererError> {
        let mut state = RenderState::Uninitialized;
        log::debug!("Renderer state: {:?}", state);

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let size = window.inner_size();
        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| RendererError::ContextInit(format!("Failed to create surface: {}", e)))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| RendererError::ContextInit(format!("Failed to request adapter: {}", e)))?;

        log::info!("Using GPU adapter: {:?}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor::default())
            .await
            .map_err(|e| RendererError::ContextInit(format!("Failed to create device: {}", e)))?;

        state = RenderState::ContextReady;
        log::debug!("Renderer state: {:?}", state);

        let capabilities = surface.get_capabilities(&adapter);
        let format = capabilities
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(capabilities.formats[0]);

        let present_mode = if capabilities.present_modes.contains(&wgpu::PresentMode::Mailbox) {
            wgpu::PresentMode::Mailbox
        } else if capabilities
            .present_modes
            .contains(&wgpu::PresentMode::Immediate)
        {
            wgpu::PresentMode::Immediate
        } else {
            wgpu::PresentMode::Fifo // always supported
        };

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode: wgpu::CompositeAlphaMode::Auto,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        // Shading program; validation failures must surface the compiler
        // diagnostic instead of panicking.
        let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Stereo Shader"),
            source: wgpu::ShaderSource::Wgsl(STEREO_SHADER.into()),
        });

        let bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Eye Bind Group Layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ],
            });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Stereo Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Stereo Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Eye Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::MipmapFilterMode::Nearest,
            ..Default::default()
        });

        if let Some(error) = scope.pop().await {
            return Err(RendererError::Program(error.to_string()));
        }
        state = RenderState::ProgramReady;

        log::info!("Stereo renderer ready ({:?}, {:?})", format, present_mode);

        Ok(Self {
            state,
            device,
            queue,
            surface: Some(surface),
            surface_config: Some(config),
            pipeline,
            bind_group_layout,
            sampler,
            left_eye: None,
            right_eye: None,
            eye_width: 0,
            eye_height: 0,
            clear_color: wgpu::Color {
                r: clear_color[0],
                g: clear_color[1],
                b: clear_color[2],
                a: clear_color[3],
            },
            last_uploaded: None,
        })
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    /// Frame id of the most recently uploaded stereo pair.
    pub fn last_uploaded(&self) -> Option<u32> {
        self.last_uploaded
    }

    /// Surface resize: only the stored dimensions are reconfigured; the
    /// context is never recreated.
    pub fn resize(&mut self, width: u32, height: u32) {
        if let (Some(surface), Some(config)) = (&self.surface, &mut self.surface_config) {
            config.width = width.max(1);
            config.height = height.max(1);
            surface.configure(&self.device, config);
            log::debug!("Surface resized to {}x{}", width, height);
        }
    }

    fn make_eye_texture(&self, label: &str, width: u32, height: u32) -> EyeTexture {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        EyeTexture {
            texture,
            bind_group,
        }
    }

    fn upload_eye(&self, eye: &EyeTexture, data: &[u8], width: u32, height: u32) {
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &eye.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: None,
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Upload both eyes of a decoded frame to their textures.
    ///
    /// Textures are resized (reallocated) on a dimension change and
    /// written in place otherwise, avoiding GPU object churn.
    pub fn upload(&mut self, image: &StereoImage) -> Result<(), RendererError> {
        if self.state == RenderState::Destroyed {
            return Err(RendererError::Render("Renderer destroyed".to_string()));
        }

        if self.eye_width != image.width
            || self.eye_height != image.height
            || self.left_eye.is_none()
        {
            log::debug!("Allocating {}x{} eye textures", image.width, image.height);
            self.left_eye = Some(self.make_eye_texture("Left Eye", image.width, image.height));
            self.right_eye = Some(self.make_eye_texture("Right Eye", image.width, image.height));
            self.eye_width = image.width;
            self.eye_height = image.height;
        }

        if let (Some(left), Some(right)) = (&self.left_eye, &self.right_eye) {
            self.upload_eye(left, &image.left, image.width, image.height);
            self.upload_eye(right, &image.right, image.width, image.height);
        }

        self.last_uploaded = Some(image.frame_id);
        self.state = RenderState::Rendering;
        Ok(())
    }

    /// Draw both eyes into their halves of the surface.
    ///
    /// Never waits for a new frame: whatever the eye textures currently
    /// hold is drawn again, so staleness is bounded by upload cadence and
    /// the loop never stalls.
    pub fn render(&mut self) -> Result<(), RendererError> {
        if self.state == RenderState::Destroyed {
            return Err(RendererError::Render("Renderer destroyed".to_string()));
        }

        let surface = self
            .surface
            .as_ref()
            .ok_or_else(|| RendererError::Render("No surface configured".to_string()))?;

        let output = surface
            .get_current_texture()
            .map_err(|e| RendererError::Render(format!("Failed to get surface texture: {}", e)))?;

        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Stereo Encoder"),
            });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Stereo Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_color),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            if let (Some(left), Some(right), Some(config)) =
                (&self.left_eye, &self.right_eye, &self.surface_config)
            {
                let [left_vp, right_vp] = eye_viewports(config.width, config.height);
                render_pass.set_pipeline(&self.pipeline);

                render_pass.set_viewport(left_vp.0, left_vp.1, left_vp.2, left_vp.3, 0.0, 1.0);
                render_pass.set_bind_group(0, &left.bind_group, &[]);
                render_pass.draw(0..3, 0..1);

                render_pass.set_viewport(right_vp.0, right_vp.1, right_vp.2, right_vp.3, 0.0, 1.0);
                render_pass.set_bind_group(0, &right.bind_group, &[]);
                render_pass.draw(0..3, 0..1);
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        Ok(())
    }

    /// Release all GPU objects and the surface. Idempotent; safe to call
    /// more than once.
    pub fn destroy(&mut self) {
        if self.state == RenderState::Destroyed {
            return;
        }
        self.left_eye = None;
        self.right_eye = None;
        self.surface = None;
        self.surface_config = None;
        self.last_uploaded = None;
        self.state = RenderState::Destroyed;
        log::info!("Stereo renderer destroyed");
    }
}

// SPDX-License-Identifier: CEPL-1.0
//! A small map: land polygon, graticule, an animated route and a marker icon.
use anyhow::Result;
use bytemuck::cast_slice;
use carto_render::{
    BufferUsage, ColorVertex, MemoryClass, RenderSize, SamplerKind, TextureFormat, TexturedVertex,
};
use carto_render_vk::{BufferHandle, DrawCall, DrawContext, GpuBackend, MultiBuffer, TextureHandle};
use glam::{Mat4, Vec3};

const LAND: [f32; 4] = [0.20, 0.45, 0.25, 1.0];
const GRID: [f32; 4] = [0.35, 0.40, 0.55, 1.0];
const ROUTE: [f32; 4] = [0.95, 0.55, 0.10, 1.0];
const GRID_LINES: u32 = 9;
const ROUTE_POINTS: usize = 32;
const MARKER_SIZE: u32 = 16;

pub struct MapScene {
    land: BufferHandle,
    land_indices: BufferHandle,
    land_index_count: u32,
    grid: BufferHandle,
    grid_vertex_count: u32,
    route: MultiBuffer,
    marker: BufferHandle,
    marker_tex: TextureHandle,
}

impl MapScene {
    pub fn new<G: GpuBackend>(r: &mut DrawContext<G>) -> Result<Self> {
        let (land_v, land_i) = land_polygon();
        let land = static_buffer(r, cast_slice(&land_v), BufferUsage::VERTEX)?;
        let land_indices = static_buffer(r, cast_slice(&land_i), BufferUsage::INDEX)?;

        let grid_v = graticule(GRID_LINES);
        let grid = static_buffer(r, cast_slice(&grid_v), BufferUsage::VERTEX)?;

        let route = r.create_multi_buffer(
            (ROUTE_POINTS * 2 * std::mem::size_of::<ColorVertex>()) as u64,
            MemoryClass::Dynamic,
            BufferUsage::VERTEX,
        )?;

        let marker = static_buffer(r, cast_slice(&marker_quad(0.06)), BufferUsage::VERTEX)?;
        let marker_tex = r.generate_texture(
            MARKER_SIZE,
            MARKER_SIZE,
            TextureFormat::Rgba8,
            SamplerKind::Nearest,
            Some(marker_pixels(MARKER_SIZE).as_slice()),
        )?;

        Ok(Self {
            land,
            land_indices,
            land_index_count: land_i.len() as u32,
            grid,
            grid_vertex_count: grid_v.len() as u32,
            route,
            marker,
            marker_tex,
        })
    }

    /// Record one frame; `t` is seconds since start.
    pub fn draw<G: GpuBackend>(&mut self, r: &mut DrawContext<G>, t: f32) -> Result<()> {
        let view = view_matrix(r.size(), t);
        r.set_global_attributes(view)?;

        r.draw(&DrawCall::geometry(&self.land, 4).indexed(&self.land_indices, self.land_index_count))?;
        r.draw(&DrawCall::geometry(&self.grid, self.grid_vertex_count).lines())?;

        let points = route_segments(t);
        // the previous frame has been waited on, so generation 0 is free again
        self.route.reset();
        let buf = r.next_generation(&mut self.route)?;
        r.update_buffer_at(buf, 0, cast_slice(&points))?;
        r.draw(&DrawCall::geometry(buf, points.len() as u32).lines())?;

        let head = route_point(t, ROUTE_POINTS - 1);
        r.set_global_attributes(view * Mat4::from_translation(Vec3::new(head[0], head[1], 0.0)))?;
        r.draw(
            &DrawCall::geometry(&self.marker, 6)
                .textured(&self.marker_tex)
                .tint([1.0, 0.9, 0.9, 1.0]),
        )?;
        r.reset_global_attributes();
        Ok(())
    }

    pub fn destroy<G: GpuBackend>(self, r: &mut DrawContext<G>) {
        r.destroy_buffer(self.land);
        r.destroy_buffer(self.land_indices);
        r.destroy_buffer(self.grid);
        r.destroy_multi_buffer(self.route);
        r.destroy_buffer(self.marker);
        r.destroy_texture(self.marker_tex);
    }
}

fn static_buffer<G: GpuBackend>(
    r: &mut DrawContext<G>,
    bytes: &[u8],
    usage: BufferUsage,
) -> Result<BufferHandle> {
    let buf = r.create_buffer(bytes.len() as u64, MemoryClass::Static, usage | BufferUsage::TRANSFER_DST)?;
    r.update_buffer_at(&buf, 0, bytes)?;
    Ok(buf)
}

/// Orthographic view keeping the unit map square centred, slowly panning.
pub fn view_matrix(size: RenderSize, t: f32) -> Mat4 {
    let aspect = size.width.max(1) as f32 / size.height.max(1) as f32;
    let (hw, hh) = if aspect >= 1.0 { (aspect, 1.0) } else { (1.0, 1.0 / aspect) };
    let pan = Vec3::new(0.05 * (t * 0.3).sin(), 0.05 * (t * 0.2).cos(), 0.0);
    Mat4::orthographic_rh(-hw, hw, -hh, hh, -1.0, 1.0) * Mat4::from_translation(pan)
}

fn cv(x: f32, y: f32, color: [f32; 4]) -> ColorVertex {
    ColorVertex {
        pos: [x, y, 0.5],
        color,
    }
}

pub fn land_polygon() -> ([ColorVertex; 4], [u32; 6]) {
    (
        [
            cv(-0.8, -0.6, LAND),
            cv(0.7, -0.7, LAND),
            cv(0.8, 0.6, LAND),
            cv(-0.6, 0.7, LAND),
        ],
        [0, 1, 2, 0, 2, 3],
    )
}

/// `n` meridians and `n` parallels across [-1, 1], as a line list.
pub fn graticule(n: u32) -> Vec<ColorVertex> {
    let mut out = Vec::with_capacity(n as usize * 4);
    for i in 0..n {
        let c = -1.0 + 2.0 * i as f32 / (n.max(2) - 1) as f32;
        out.push(cv(c, -1.0, GRID));
        out.push(cv(c, 1.0, GRID));
        out.push(cv(-1.0, c, GRID));
        out.push(cv(1.0, c, GRID));
    }
    out
}

fn route_point(t: f32, i: usize) -> [f32; 2] {
    let s = i as f32 / (ROUTE_POINTS - 1) as f32;
    let x = -0.7 + 1.4 * s;
    let y = 0.3 * (3.0 * s * std::f32::consts::PI + t).sin();
    [x, y]
}

/// The route polyline as a line list of `ROUTE_POINTS - 1` segments.
pub fn route_segments(t: f32) -> Vec<ColorVertex> {
    let mut out = Vec::with_capacity((ROUTE_POINTS - 1) * 2);
    for i in 0..ROUTE_POINTS - 1 {
        let [x0, y0] = route_point(t, i);
        let [x1, y1] = route_point(t, i + 1);
        out.push(cv(x0, y0, ROUTE));
        out.push(cv(x1, y1, ROUTE));
    }
    out
}

fn marker_quad(half: f32) -> [TexturedVertex; 6] {
    let v = |x: f32, y: f32, u: f32, w: f32| TexturedVertex {
        pos: [x * half, y * half, 0.25],
        uv: [u, w],
        color: [1.0; 4],
    };
    [
        v(-1.0, -1.0, 0.0, 1.0),
        v(1.0, -1.0, 1.0, 1.0),
        v(1.0, 1.0, 1.0, 0.0),
        v(-1.0, -1.0, 0.0, 1.0),
        v(1.0, 1.0, 1.0, 0.0),
        v(-1.0, 1.0, 0.0, 0.0),
    ]
}

/// Filled disc with a dark rim on a transparent background, RGBA8.
pub fn marker_pixels(size: u32) -> Vec<u8> {
    let mut px = Vec::with_capacity((size * size * 4) as usize);
    let c = (size as f32 - 1.0) / 2.0;
    for y in 0..size {
        for x in 0..size {
            let d = ((x as f32 - c).powi(2) + (y as f32 - c).powi(2)).sqrt() / (c + 0.5);
            let rgba = match d {
                d if d < 0.7 => [230, 40, 40, 255],
                d if d < 1.0 => [60, 10, 10, 255],
                _ => [0, 0, 0, 0],
            };
            px.extend_from_slice(&rgba);
        }
    }
    px
}

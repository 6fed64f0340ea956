use std::collections::HashMap;
use std::fmt::Write;

use rand::Rng;

use crate::config::RenderSettings;
use crate::models::{GraphPayload, VertexId};

pub const VISUAL_CONTENT_TYPE: &str = "image/svg+xml";

const MARGIN: f64 = 40.0;
const VERTEX_RADIUS: f64 = 14.0;
// Upper bound on pairwise force evaluations per render.
const LAYOUT_BUDGET: usize = 4_000_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Fruchterman-Reingold spring layout in the unit square.
pub fn spring_layout<R>(payload: &GraphPayload, iterations: usize, rng: &mut R) -> Vec<Point>
where
    R: Rng + ?Sized,
{
    let n = payload.vertices.len();
    if n < 2 {
        return vec![Point { x: 0.5, y: 0.5 }; n];
    }
    let mut positions: Vec<Point> = (0..n)
        .map(|_| Point {
            x: rng.gen_range(0.0..1.0),
            y: rng.gen_range(0.0..1.0),
        })
        .collect();

    let index: HashMap<VertexId, usize> = payload
        .vertices
        .iter()
        .enumerate()
        .map(|(position, vertex)| (*vertex, position))
        .collect();
    let links: Vec<(usize, usize)> = payload
        .edges
        .iter()
        .filter_map(|edge| Some((*index.get(&edge.from)?, *index.get(&edge.to)?)))
        .filter(|(from, to)| from != to)
        .collect();

    let k = (1.0 / n as f64).sqrt();
    let iterations = iterations.min((LAYOUT_BUDGET / (n * n)).max(10));
    let mut temperature = 0.1;
    let cooling = temperature / (iterations as f64 + 1.0);

    for _ in 0..iterations {
        let mut displacement = vec![Point { x: 0.0, y: 0.0 }; n];

        for a in 0..n {
            for b in (a + 1)..n {
                let dx = positions[a].x - positions[b].x;
                let dy = positions[a].y - positions[b].y;
                let distance = (dx * dx + dy * dy).sqrt().max(0.01);
                let force = k * k / distance;
                let (fx, fy) = (dx / distance * force, dy / distance * force);
                displacement[a].x += fx;
                displacement[a].y += fy;
                displacement[b].x -= fx;
                displacement[b].y -= fy;
            }
        }

        for (from, to) in &links {
            let dx = positions[*from].x - positions[*to].x;
            let dy = positions[*from].y - positions[*to].y;
            let distance = (dx * dx + dy * dy).sqrt().max(0.01);
            let force = distance * distance / k;
            let (fx, fy) = (dx / distance * force, dy / distance * force);
            displacement[*from].x -= fx;
            displacement[*from].y -= fy;
            displacement[*to].x += fx;
            displacement[*to].y += fy;
        }

        for (position, delta) in positions.iter_mut().zip(&displacement) {
            let length = (delta.x * delta.x + delta.y * delta.y).sqrt();
            if length > 0.0 {
                let step = length.min(temperature);
                position.x = (position.x + delta.x / length * step).clamp(0.0, 1.0);
                position.y = (position.y + delta.y / length * step).clamp(0.0, 1.0);
            }
        }
        temperature -= cooling;
    }

    positions
}

pub fn render_svg<R>(payload: &GraphPayload, settings: &RenderSettings, rng: &mut R) -> Vec<u8>
where
    R: Rng + ?Sized,
{
    let layout = spring_layout(payload, settings.layout_iterations, rng);
    let width = f64::from(settings.width.max(1));
    let height = f64::from(settings.height.max(1));
    let canvas: HashMap<VertexId, Point> = payload
        .vertices
        .iter()
        .zip(&layout)
        .map(|(vertex, point)| {
            (
                *vertex,
                Point {
                    x: MARGIN + point.x * (width - 2.0 * MARGIN).max(0.0),
                    y: MARGIN + point.y * (height - 2.0 * MARGIN).max(0.0),
                },
            )
        })
        .collect();

    let mut svg = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = settings.width,
        h = settings.height
    );
    if payload.directed {
        let _ = writeln!(
            svg,
            r##"<defs><marker id="arrow" viewBox="0 0 10 10" refX="{}" refY="5" markerWidth="6" markerHeight="6" orient="auto-start-reverse"><path d="M 0 0 L 10 5 L 0 10 z" fill="gray"/></marker></defs>"##,
            10.0 + VERTEX_RADIUS * 10.0 / 6.0
        );
    }
    let _ = writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#);

    for edge in &payload.edges {
        let (Some(from), Some(to)) = (canvas.get(&edge.from), canvas.get(&edge.to)) else {
            continue;
        };
        if edge.from == edge.to {
            let _ = writeln!(
                svg,
                r#"<circle class="edge" data-from="{}" data-to="{}" cx="{:.1}" cy="{:.1}" r="{:.1}" fill="none" stroke="gray" stroke-width="1.5" stroke-opacity="0.7"/>"#,
                edge.from,
                edge.to,
                from.x,
                from.y - VERTEX_RADIUS,
                VERTEX_RADIUS
            );
        } else {
            let marker = if payload.directed {
                r#" marker-end="url(#arrow)""#
            } else {
                ""
            };
            let _ = writeln!(
                svg,
                r#"<line class="edge" data-from="{}" data-to="{}" x1="{:.1}" y1="{:.1}" x2="{:.1}" y2="{:.1}" stroke="gray" stroke-width="1.5" stroke-opacity="0.7"{}/>"#,
                edge.from, edge.to, from.x, from.y, to.x, to.y, marker
            );
        }
        let _ = writeln!(
            svg,
            r#"<text class="weight" x="{:.1}" y="{:.1}" font-family="sans-serif" font-size="8" text-anchor="middle">{}</text>"#,
            (from.x + to.x) / 2.0,
            (from.y + to.y) / 2.0 - 3.0,
            format_weight(edge.weight)
        );
    }

    for vertex in &payload.vertices {
        let Some(point) = canvas.get(vertex) else {
            continue;
        };
        let _ = writeln!(
            svg,
            r##"<circle class="vertex" data-id="{}" cx="{:.1}" cy="{:.1}" r="{}" fill="#1f78b4" fill-opacity="0.9"/>"##,
            vertex, point.x, point.y, VERTEX_RADIUS
        );
        let _ = writeln!(
            svg,
            r#"<text class="label" x="{:.1}" y="{:.1}" font-family="sans-serif" font-size="10" font-weight="bold" text-anchor="middle" dominant-baseline="central">{}</text>"#,
            point.x, point.y, vertex
        );
    }
    svg.push_str("</svg>\n");

    svg.into_bytes()
}

fn format_weight(weight: f64) -> String {
    if weight.fract() == 0.0 && weight.abs() < 1e15 {
        format!("{}", weight as i64)
    } else {
        format!("{}", weight)
    }
}

/// Incremental Bowyer-Watson Delaunay triangulation of planar points.
///
/// Points are normalised to the unit square, inserted in Z-order for short
/// point-location walks, and enclosed by a large super triangle that is
/// stripped from the result.

const NONE: usize = usize::MAX;

/// Squared distance (in normalised units) under which two points are merged.
const DUPLICATE_EPS_SQ: f64 = 1e-20;

/// Counter-clockwise triangles indexing into the input slice.
#[derive(Debug, Clone, Default)]
pub struct Triangulation {
    pub triangles: Vec<[usize; 3]>,
}

struct Mesh {
    verts: Vec<(f64, f64)>,
    tris: Vec<[usize; 3]>,
    /// `adj[t][i]` is the triangle across the edge opposite vertex `i`.
    adj: Vec<[usize; 3]>,
    alive: Vec<bool>,
    free: Vec<usize>,
    mark: Vec<u32>,
    stamp: u32,
    last: usize,
}

#[inline]
fn orient(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> f64 {
    (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0)
}

/// Positive when `d` lies inside the circumcircle of counter-clockwise `a, b, c`.
#[inline]
fn in_circle(a: (f64, f64), b: (f64, f64), c: (f64, f64), d: (f64, f64)) -> f64 {
    let (adx, ady) = (a.0 - d.0, a.1 - d.1);
    let (bdx, bdy) = (b.0 - d.0, b.1 - d.1);
    let (cdx, cdy) = (c.0 - d.0, c.1 - d.1);
    let ad = adx * adx + ady * ady;
    let bd = bdx * bdx + bdy * bdy;
    let cd = cdx * cdx + cdy * cdy;
    ad * (bdx * cdy - cdx * bdy) + bd * (cdx * ady - adx * cdy) + cd * (adx * bdy - bdx * ady)
}

/// Morton encoding for 2D coordinates (16 bits per axis)
fn morton_encode_2d(x: u32, y: u32) -> u32 {
    let mut result = 0u32;
    for i in 0..16 {
        result |= (x & (1 << i)) << i;
        result |= (y & (1 << i)) << (i + 1);
    }
    result
}

impl Mesh {
    fn new(verts: Vec<(f64, f64)>, super_start: usize) -> Self {
        let mut mesh = Self {
            verts,
            tris: Vec::new(),
            adj: Vec::new(),
            alive: Vec::new(),
            free: Vec::new(),
            mark: Vec::new(),
            stamp: 0,
            last: 0,
        };
        mesh.allocate([super_start, super_start + 1, super_start + 2], [NONE; 3]);
        mesh
    }

    fn allocate(&mut self, tri: [usize; 3], adj: [usize; 3]) -> usize {
        if let Some(slot) = self.free.pop() {
            self.tris[slot] = tri;
            self.adj[slot] = adj;
            self.alive[slot] = true;
            slot
        } else {
            self.tris.push(tri);
            self.adj.push(adj);
            self.alive.push(true);
            self.mark.push(0);
            self.tris.len() - 1
        }
    }

    fn contains(&self, t: usize, p: (f64, f64)) -> bool {
        let [a, b, c] = self.tris[t];
        orient(self.verts[a], self.verts[b], p) >= 0.0
            && orient(self.verts[b], self.verts[c], p) >= 0.0
            && orient(self.verts[c], self.verts[a], p) >= 0.0
    }

    fn locate(&self, p: (f64, f64)) -> Option<usize> {
        let mut t = self.last;
        for _ in 0..self.tris.len() {
            let tri = self.tris[t];
            let mut next = NONE;
            for i in 0..3 {
                let u = self.verts[tri[(i + 1) % 3]];
                let w = self.verts[tri[(i + 2) % 3]];
                if orient(u, w, p) < 0.0 && self.adj[t][i] != NONE {
                    next = self.adj[t][i];
                    break;
                }
            }
            if next == NONE {
                return Some(t);
            }
            t = next;
        }

        // Walk did not settle; fall back to a scan.
        (0..self.tris.len()).find(|&t| self.alive[t] && self.contains(t, p))
    }

    fn circumcircle_contains(&self, t: usize, p: (f64, f64)) -> bool {
        let [a, b, c] = self.tris[t];
        in_circle(self.verts[a], self.verts[b], self.verts[c], p) > 0.0
    }

    /// Insert vertex `v`. Returns false when it duplicates an existing vertex.
    fn insert(&mut self, v: usize) -> bool {
        let p = self.verts[v];
        let Some(start) = self.locate(p) else {
            return false;
        };
        for &corner in &self.tris[start] {
            let q = self.verts[corner];
            let (dx, dy) = (q.0 - p.0, q.1 - p.1);
            if dx * dx + dy * dy < DUPLICATE_EPS_SQ {
                return false;
            }
        }

        self.stamp = self.stamp.wrapping_add(1);
        let stamp = self.stamp;

        // Cavity: triangles whose circumcircle contains p, connected to `start`.
        let mut cavity = vec![start];
        self.mark[start] = stamp;
        let mut stack = vec![start];
        while let Some(t) = stack.pop() {
            for i in 0..3 {
                let n = self.adj[t][i];
                if n != NONE && self.mark[n] != stamp && self.circumcircle_contains(n, p) {
                    self.mark[n] = stamp;
                    cavity.push(n);
                    stack.push(n);
                }
            }
        }

        // Boundary edges (u, w) of the cavity with the outer neighbour and
        // the outer neighbour's slot that points back into the cavity.
        let mut boundary = Vec::with_capacity(cavity.len() + 2);
        for &t in &cavity {
            let tri = self.tris[t];
            for i in 0..3 {
                let outer = self.adj[t][i];
                if outer == NONE || self.mark[outer] != stamp {
                    let back = if outer == NONE {
                        NONE
                    } else {
                        (0..3).find(|&j| self.adj[outer][j] == t).unwrap_or(NONE)
                    };
                    boundary.push((tri[(i + 1) % 3], tri[(i + 2) % 3], outer, back));
                }
            }
        }

        for &t in &cavity {
            self.alive[t] = false;
            self.free.push(t);
        }

        let mut created = Vec::with_capacity(boundary.len());
        for &(u, w, outer, back) in &boundary {
            let nt = self.allocate([u, w, v], [NONE, NONE, outer]);
            if outer != NONE && back != NONE {
                self.adj[outer][back] = nt;
            }
            created.push((u, w, nt));
        }

        // Link the fan around p: the edge (w, p) of [u, w, p] is shared with
        // the new triangle starting at w.
        for &(_, w, nt) in &created {
            if let Some(&(_, _, next)) = created.iter().find(|&&(u2, _, _)| u2 == w) {
                self.adj[nt][0] = next;
                self.adj[next][1] = nt;
            }
        }

        if let Some(&(_, _, nt)) = created.last() {
            self.last = nt;
        }
        true
    }
}

/// Triangulate `points`. Duplicate points are ignored, so fewer than three
/// distinct points give an empty triangulation.
pub fn triangulate(points: &[(f64, f64)]) -> Triangulation {
    let n = points.len();
    if n < 3 {
        return Triangulation::default();
    }

    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for &(x, y) in points {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    let span = (max_x - min_x).max(max_y - min_y);
    if span <= 0.0 || !span.is_finite() {
        return Triangulation::default();
    }

    let mut verts: Vec<(f64, f64)> = points
        .iter()
        .map(|&(x, y)| ((x - min_x) / span, (y - min_y) / span))
        .collect();
    verts.extend_from_slice(&[(-100.0, -100.0), (300.0, -100.0), (-100.0, 300.0)]);

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&i| {
        let (x, y) = verts[i];
        morton_encode_2d((x * 65535.0) as u32, (y * 65535.0) as u32)
    });

    let mut mesh = Mesh::new(verts, n);
    for &i in &order {
        mesh.insert(i);
    }

    let triangles = (0..mesh.tris.len())
        .filter(|&t| mesh.alive[t])
        .map(|t| mesh.tris[t])
        .filter(|tri| tri.iter().all(|&v| v < n))
        .collect();

    Triangulation { triangles }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_area(points: &[(f64, f64)], tri: [usize; 3]) -> f64 {
        orient(points[tri[0]], points[tri[1]], points[tri[2]]) / 2.0
    }

    #[test]
    fn square_splits_into_two_triangles() {
        let points = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)];
        let tin = triangulate(&points);
        assert_eq!(tin.triangles.len(), 2);
        let area: f64 = tin.triangles.iter().map(|&t| signed_area(&points, t)).sum();
        assert!((area - 1.0).abs() < 1e-9);
    }

    #[test]
    fn grid_triangulation_is_delaunay_and_covers_hull() {
        let mut points = Vec::new();
        for i in 0..12 {
            for j in 0..9 {
                let jitter = ((i * 7 + j * 13) % 5) as f64 * 0.03;
                points.push((i as f64 + jitter, j as f64 * 1.1 - jitter));
            }
        }
        let tin = triangulate(&points);
        assert!(!tin.triangles.is_empty());

        for &tri in &tin.triangles {
            assert!(signed_area(&points, tri) > 0.0, "triangle {:?} not CCW", tri);
            let (a, b, c) = (points[tri[0]], points[tri[1]], points[tri[2]]);
            for (k, &p) in points.iter().enumerate() {
                if tri.contains(&k) {
                    continue;
                }
                assert!(in_circle(a, b, c, p) <= 1e-6, "point {} inside circumcircle", k);
            }
        }

        // Interior cells of the jittered grid must be fully covered.
        let area: f64 = tin.triangles.iter().map(|&t| signed_area(&points, t)).sum();
        assert!(area > 0.9 * 11.0 * 8.0 * 1.1 * 0.9);
    }

    #[test]
    fn duplicates_and_degenerate_input_are_tolerated() {
        let points = [(0.0, 0.0), (0.0, 0.0), (2.0, 0.0), (0.0, 2.0), (2.0, 0.0)];
        let tin = triangulate(&points);
        assert_eq!(tin.triangles.len(), 1);

        assert!(triangulate(&[(1.0, 1.0), (1.0, 1.0), (1.0, 1.0)]).triangles.is_empty());
        assert!(triangulate(&[(0.0, 0.0), (1.0, 1.0)]).triangles.is_empty());
    }

    #[test]
    fn morton_interleaves_bits() {
        assert_eq!(morton_encode_2d(0b1, 0b0), 0b01);
        assert_eq!(morton_encode_2d(0b0, 0b1), 0b10);
        assert_eq!(morton_encode_2d(0b11, 0b11), 0b1111);
    }
}

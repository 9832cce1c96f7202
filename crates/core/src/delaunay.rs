//! Narrow seam around the computational-geometry collaborator.
//!
//! The geometry engine only needs `points -> simplices`, so any correct
//! Delaunay implementation is substitutable here. 2D goes through the
//! `delaunator` crate; 3D uses a native incremental Bowyer-Watson since no
//! equivalent ecosystem crate exists for tetrahedralization.
//!
//! Both entry points are total: degenerate or undersized inputs yield an
//! empty result instead of an error, since triangulation consumers
//! (visualization, neighbor topology) are best-effort.

use std::collections::HashMap;

pub type Triangle = [usize; 3];
pub type Tetrahedron = [usize; 4];

/// Delaunay triangulation of a planar point set, as vertex index triples.
pub fn triangulate_2d(points: &[[f64; 2]]) -> Vec<Triangle> {
    if points.len() < 3 {
        return Vec::new();
    }
    let pts: Vec<delaunator::Point> = points
        .iter()
        .map(|p| delaunator::Point { x: p[0], y: p[1] })
        .collect();
    let result = delaunator::triangulate(&pts);
    result
        .triangles
        .chunks_exact(3)
        .map(|t| [t[0], t[1], t[2]])
        .collect()
}

/// Delaunay tetrahedralization of a 3D point set, as vertex index quadruples.
///
/// Incremental Bowyer-Watson: points are inserted one at a time into a
/// super-tetrahedron; every tetrahedron whose circumsphere contains the new
/// point is removed and the cavity boundary is re-triangulated against the
/// point. Simplices touching the super vertices are dropped at the end.
/// Exactly cospherical sets (regular lattices) resolve ties towards "outside",
/// which still yields a valid Delaunay triangulation.
pub fn tetrahedralize_3d(points: &[[f64; 3]]) -> Vec<Tetrahedron> {
    let n = points.len();
    if n < 4 {
        return Vec::new();
    }

    let mut min = points[0];
    let mut max = points[0];
    for p in points {
        for d in 0..3 {
            min[d] = min[d].min(p[d]);
            max[d] = max[d].max(p[d]);
        }
    }
    let center = [
        0.5 * (min[0] + max[0]),
        0.5 * (min[1] + max[1]),
        0.5 * (min[2] + max[2]),
    ];
    let extent = (max[0] - min[0])
        .max(max[1] - min[1])
        .max(max[2] - min[2])
        .max(1.0);
    // Far enough out that every circumsphere of the input fits inside.
    let big = 20.0 * extent;

    // Regular lattices are exactly cospherical, which makes the insphere
    // predicate tie constantly. A deterministic sub-epsilon jitter on the
    // predicate coordinates breaks the ties without visibly moving any
    // vertex; simplex indices still refer to the unperturbed input.
    let jitter = 1e-9 * extent;
    let mut verts: Vec<[f64; 3]> = points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            [
                p[0] + jitter * unit_hash(i as u64, 0),
                p[1] + jitter * unit_hash(i as u64, 1),
                p[2] + jitter * unit_hash(i as u64, 2),
            ]
        })
        .collect();
    verts.push([center[0], center[1], center[2] + 3.0 * big]);
    verts.push([center[0] - 2.0 * big, center[1] - big, center[2] - big]);
    verts.push([center[0] + 2.0 * big, center[1] - big, center[2] - big]);
    verts.push([center[0], center[1] + 2.0 * big, center[2] - big]);

    let mut tets: Vec<Tetrahedron> = vec![oriented([n, n + 1, n + 2, n + 3], &verts)];

    for p in 0..n {
        let mut bad = Vec::new();
        for (t, tet) in tets.iter().enumerate() {
            if in_circumsphere(tet, p, &verts) {
                bad.push(t);
            }
        }

        // Faces of the cavity are those belonging to exactly one bad tet.
        let mut faces: HashMap<[usize; 3], (usize, [usize; 3])> = HashMap::new();
        for &t in &bad {
            let [a, b, c, d] = tets[t];
            for face in [[a, b, c], [a, b, d], [a, c, d], [b, c, d]] {
                let mut key = face;
                key.sort_unstable();
                faces
                    .entry(key)
                    .and_modify(|e| e.0 += 1)
                    .or_insert((1, face));
            }
        }

        for &t in bad.iter().rev() {
            tets.swap_remove(t);
        }
        for (count, face) in faces.into_values() {
            if count == 1 {
                tets.push(oriented([face[0], face[1], face[2], p], &verts));
            }
        }
    }

    tets.retain(|tet| tet.iter().all(|&v| v < n));
    tets
}

/// Deterministic hash mapped to [-0.5, 0.5), for predicate jitter.
fn unit_hash(index: u64, axis: u64) -> f64 {
    let mut x = index
        .wrapping_mul(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(axis.wrapping_mul(0xbf58_476d_1ce4_e5b9));
    x ^= x >> 30;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^= x >> 31;
    (x >> 11) as f64 / (1u64 << 53) as f64 - 0.5
}

/// Swap two vertices if needed so that `orient3d` is non-negative.
fn oriented(tet: Tetrahedron, verts: &[[f64; 3]]) -> Tetrahedron {
    let [a, b, c, d] = tet;
    if orient3d(&verts[a], &verts[b], &verts[c], &verts[d]) < 0.0 {
        [a, c, b, d]
    } else {
        [a, b, c, d]
    }
}

/// Signed volume determinant; positive for a positively oriented tetrahedron.
fn orient3d(a: &[f64; 3], b: &[f64; 3], c: &[f64; 3], d: &[f64; 3]) -> f64 {
    let m = [
        [b[0] - a[0], b[1] - a[1], b[2] - a[2]],
        [c[0] - a[0], c[1] - a[1], c[2] - a[2]],
        [d[0] - a[0], d[1] - a[1], d[2] - a[2]],
    ];
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// True when point `p` lies strictly inside the circumsphere of `tet`.
///
/// `tet` must be positively oriented; ties (cospherical points) count as
/// outside.
fn in_circumsphere(tet: &Tetrahedron, p: usize, verts: &[[f64; 3]]) -> bool {
    let pv = verts[p];
    let mut m = [[0.0f64; 4]; 4];
    for (row, &v) in tet.iter().enumerate() {
        let dx = verts[v][0] - pv[0];
        let dy = verts[v][1] - pv[1];
        let dz = verts[v][2] - pv[2];
        m[row] = [dx, dy, dz, dx * dx + dy * dy + dz * dz];
    }
    // With rows (a-p, b-p, c-p, d-p) and a positively oriented tetrahedron,
    // the determinant is negative exactly when p is inside.
    det4(&m) < 0.0
}

fn det4(m: &[[f64; 4]; 4]) -> f64 {
    let mut det = 0.0;
    for col in 0..4 {
        let mut sub = [[0.0f64; 3]; 3];
        for r in 1..4 {
            let mut cc = 0;
            for c in 0..4 {
                if c != col {
                    sub[r - 1][cc] = m[r][c];
                    cc += 1;
                }
            }
        }
        let minor = sub[0][0] * (sub[1][1] * sub[2][2] - sub[1][2] * sub[2][1])
            - sub[0][1] * (sub[1][0] * sub[2][2] - sub[1][2] * sub[2][0])
            + sub[0][2] * (sub[1][0] * sub[2][1] - sub[1][1] * sub[2][0]);
        let sign = if col % 2 == 0 { 1.0 } else { -1.0 };
        det += sign * m[0][col] * minor;
    }
    det
}

//! Lattice geometry: construction, derived metadata and simplex queries.
//!
//! A [`Geometry`] is built once from a compact specification (Bravais
//! vectors, basis atoms, cell counts, composition, pinning, defects) and is
//! immutable afterwards; the only interior mutation is the lazily computed
//! triangulation/tetrahedra cache, which is externally idempotent.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::delaunay::{self, Tetrahedron, Triangle};
use crate::error::GeometryError;
use crate::field::{IntField, Scalar, ScalarField, Vector3, VectorField};
use crate::lattice::{classify, BravaisLatticeType, BravaisVectors};

/// Tolerance for coincidence, parallelism and orthogonality tests.
const EPSILON: Scalar = 1e-6;

/// Atom type marking a vacant site.
pub const VACANCY: i32 = -1;

fn default_seed() -> u64 {
    2006
}

/// One entry of a unit-cell composition: which basis atom it configures and
/// the type/moment it assigns. `concentration` is only consulted for
/// disordered compositions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositionEntry {
    pub iatom: usize,
    pub atom_type: i32,
    pub mu_s: Scalar,
    #[serde(default)]
    pub concentration: Scalar,
}

/// Ordered or disordered occupation of the unit cell.
///
/// In the disordered case each entry is visited independently with
/// probability equal to its concentration; unvisited basis atoms become
/// vacancies. The seed is part of the specification, so repeated
/// constructions are reproducible across process runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellComposition {
    #[serde(default)]
    pub disordered: bool,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub entries: Vec<CompositionEntry>,
}

impl CellComposition {
    pub fn ordered(entries: Vec<CompositionEntry>) -> Self {
        Self {
            disordered: false,
            seed: default_seed(),
            entries,
        }
    }

    pub fn disordered(entries: Vec<CompositionEntry>, seed: u64) -> Self {
        Self {
            disordered: true,
            seed,
            entries,
        }
    }
}

impl Default for CellComposition {
    fn default() -> Self {
        Self::ordered(Vec::new())
    }
}

/// A single lattice site addressed by basis index and cell translations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Site {
    pub basis: usize,
    pub translations: [usize; 3],
}

/// Pinning specification: boundary-layer depths per axis plus explicit
/// pinned sites with their fixed values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pinning {
    pub na_left: usize,
    pub na_right: usize,
    pub nb_left: usize,
    pub nb_right: usize,
    pub nc_left: usize,
    pub nc_right: usize,
    /// Per-basis-atom value applied in the pinned boundary layers.
    /// Empty means zero vectors.
    pub pinned_cell: Vec<Vector3>,
    pub sites: Vec<Site>,
    pub spins: Vec<Vector3>,
}

/// Explicit per-site overrides of atom type; defect sites get zero moment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Defects {
    pub sites: Vec<Site>,
    pub types: Vec<i32>,
}

/// Simplex cache keyed on the subsampling step and the cell counts.
/// Recomputation only happens when the key changes; a hit hands back the
/// stored `Arc` untouched.
#[derive(Debug)]
struct SimplexCache {
    last_step: usize,
    last_n_cells: [usize; 3],
    triangles: Arc<Vec<Triangle>>,
    tetrahedra: Arc<Vec<Tetrahedron>>,
}

impl SimplexCache {
    fn empty() -> Self {
        Self {
            last_step: 0,
            last_n_cells: [0; 3],
            triangles: Arc::new(Vec::new()),
            tetrahedra: Arc::new(Vec::new()),
        }
    }

    fn refresh(&mut self, step: usize, n_cells: [usize; 3]) -> bool {
        let stale = self.last_step != step || self.last_n_cells != n_cells;
        if stale {
            self.last_step = step;
            self.last_n_cells = n_cells;
        }
        stale
    }
}

#[derive(Debug)]
pub struct Geometry {
    bravais_vectors: BravaisVectors,
    n_cells: [usize; 3],
    n_cell_atoms: usize,
    cell_atoms: Vec<Vector3>,
    cell_composition: CellComposition,
    lattice_constant: Scalar,

    nos: usize,
    nos_nonvacant: usize,

    positions: VectorField,
    atom_types: IntField,
    mu_s: ScalarField,
    mask_unpinned: IntField,
    mask_pinned_cells: VectorField,

    bounds_min: Vector3,
    bounds_max: Vector3,
    cell_bounds_min: Vector3,
    cell_bounds_max: Vector3,
    center: Vector3,
    dimensionality: usize,
    classifier: BravaisLatticeType,

    cache: Mutex<SimplexCache>,
}

impl Geometry {
    pub fn new(
        bravais_vectors: BravaisVectors,
        n_cells: [usize; 3],
        cell_atoms: Vec<Vector3>,
        cell_composition: CellComposition,
        lattice_constant: Scalar,
        pinning: Pinning,
        defects: Defects,
    ) -> Result<Self, GeometryError> {
        validate_inputs(
            &n_cells,
            &cell_atoms,
            &cell_composition,
            &pinning,
            &defects,
        )?;

        let n_cell_atoms = cell_atoms.len();
        let nos = n_cell_atoms * n_cells[0] * n_cells[1] * n_cells[2];

        check_coincidence(&bravais_vectors, &n_cells, &cell_atoms, lattice_constant)?;

        let positions =
            generate_positions(&bravais_vectors, &n_cells, &cell_atoms, lattice_constant);

        let (bounds_min, bounds_max) = bounds_of(&positions);
        let center = (bounds_min + bounds_max) * 0.5;
        let (cell_bounds_min, cell_bounds_max) =
            unit_cell_bounds(&bravais_vectors, &positions, n_cell_atoms, lattice_constant);
        let dimensionality =
            infer_dimensionality(&bravais_vectors, &n_cells, &positions, n_cell_atoms);
        let classifier = classify(&bravais_vectors, n_cell_atoms);

        let mut geometry = Self {
            bravais_vectors,
            n_cells,
            n_cell_atoms,
            cell_atoms,
            cell_composition,
            lattice_constant,
            nos,
            nos_nonvacant: nos,
            positions,
            atom_types: IntField::filled(nos, 0),
            mu_s: ScalarField::filled(nos, 1.0),
            mask_unpinned: IntField::filled(nos, 1),
            mask_pinned_cells: VectorField::zeros(nos),
            bounds_min,
            bounds_max,
            cell_bounds_min,
            cell_bounds_max,
            center,
            dimensionality,
            classifier,
            cache: Mutex::new(SimplexCache::empty()),
        };

        geometry.apply_cell_composition();
        geometry.apply_boundary_pinning(&pinning);

        for (site, spin) in pinning.sites.iter().zip(&pinning.spins) {
            let ispin = geometry.site_index(site.basis, site.translations);
            geometry.mask_unpinned[ispin] = 0;
            geometry.mask_pinned_cells[ispin] = *spin;
        }

        for (site, atom_type) in defects.sites.iter().zip(&defects.types) {
            let ispin = geometry.site_index(site.basis, site.translations);
            if *atom_type < 0 && geometry.atom_types[ispin] >= 0 {
                geometry.nos_nonvacant -= 1;
            }
            geometry.atom_types[ispin] = *atom_type;
            geometry.mu_s[ispin] = 0.0;
        }

        Ok(geometry)
    }

    /// Linear site index: basis atom fastest, then a, b, c cells.
    #[inline]
    pub fn site_index(&self, iatom: usize, translations: [usize; 3]) -> usize {
        let [na, nb, nc] = translations;
        iatom + self.n_cell_atoms * (na + self.n_cells[0] * (nb + self.n_cells[1] * nc))
    }

    pub fn nos(&self) -> usize {
        self.nos
    }

    pub fn nos_nonvacant(&self) -> usize {
        self.nos_nonvacant
    }

    pub fn n_cells(&self) -> [usize; 3] {
        self.n_cells
    }

    pub fn n_cell_atoms(&self) -> usize {
        self.n_cell_atoms
    }

    pub fn cell_atoms(&self) -> &[Vector3] {
        &self.cell_atoms
    }

    pub fn bravais_vectors(&self) -> &BravaisVectors {
        &self.bravais_vectors
    }

    pub fn lattice_constant(&self) -> Scalar {
        self.lattice_constant
    }

    pub fn cell_composition(&self) -> &CellComposition {
        &self.cell_composition
    }

    pub fn positions(&self) -> &VectorField {
        &self.positions
    }

    pub fn atom_types(&self) -> &IntField {
        &self.atom_types
    }

    pub fn mu_s(&self) -> &ScalarField {
        &self.mu_s
    }

    pub fn mask_unpinned(&self) -> &IntField {
        &self.mask_unpinned
    }

    pub fn mask_pinned_cells(&self) -> &VectorField {
        &self.mask_pinned_cells
    }

    pub fn bounds(&self) -> (Vector3, Vector3) {
        (self.bounds_min, self.bounds_max)
    }

    pub fn cell_bounds(&self) -> (Vector3, Vector3) {
        (self.cell_bounds_min, self.cell_bounds_max)
    }

    pub fn center(&self) -> Vector3 {
        self.center
    }

    /// Effective geometric rank (0-3) considering both the basis and the
    /// periodic extent.
    pub fn dimensionality(&self) -> usize {
        self.dimensionality
    }

    pub fn classifier(&self) -> BravaisLatticeType {
        self.classifier
    }

    /// Overwrite pinned sites of `field` with their configured values,
    /// leaving every unpinned site exactly as supplied.
    pub fn apply_pinning(&self, field: &mut VectorField) {
        assert_eq!(field.len(), self.nos, "field lengths must match");
        for i in 0..self.nos {
            if self.mask_unpinned[i] == 0 {
                field[i] = self.mask_pinned_cells[i];
            }
        }
    }

    /// Delaunay triangulation of the (subsampled) lattice, for 2D
    /// geometries. Cached; only recomputed when `(n_cell_step, n_cells)`
    /// differs from the last computation.
    ///
    /// Returns empty for non-2D geometries and when subsampling leaves
    /// fewer than 2 cells along a periodic axis.
    pub fn triangulation(&self, n_cell_step: usize) -> Arc<Vec<Triangle>> {
        let step = n_cell_step.max(1);
        if self.dimensionality != 2 {
            return Arc::new(Vec::new());
        }
        if (0..3).any(|d| self.n_cells[d] / step < 2 && self.n_cells[d] > 1) {
            return Arc::new(Vec::new());
        }

        let mut cache = self.cache.lock();
        if cache.refresh(step, self.n_cells) {
            let points: Vec<[f64; 2]> = self
                .subsampled_positions(step)
                .iter()
                .map(|p| [p.x as f64, p.y as f64])
                .collect();
            let triangles = panic::catch_unwind(AssertUnwindSafe(|| {
                delaunay::triangulate_2d(&points)
            }))
            .unwrap_or_else(|_| {
                log::warn!("could not compute the 2D Delaunay triangulation of the geometry");
                Vec::new()
            });
            cache.triangles = Arc::new(triangles);
            cache.tetrahedra = Arc::new(Vec::new());
        }
        Arc::clone(&cache.triangles)
    }

    /// Delaunay tetrahedralization of the (subsampled) lattice, for 3D
    /// geometries. Single-basis-atom lattices use the fixed 6-tetrahedra
    /// decomposition of each unit cube; general bases go through the
    /// Delaunay seam. Same caching contract as [`Self::triangulation`].
    pub fn tetrahedra(&self, n_cell_step: usize) -> Arc<Vec<Tetrahedron>> {
        let step = n_cell_step.max(1);
        if self.dimensionality != 3 {
            return Arc::new(Vec::new());
        }
        if (0..3).any(|d| self.n_cells[d] / step < 2) {
            return Arc::new(Vec::new());
        }

        let mut cache = self.cache.lock();
        if cache.refresh(step, self.n_cells) {
            let tetrahedra = if self.n_cell_atoms == 1 {
                self.regular_tetrahedra(step)
            } else {
                let points: Vec<[f64; 3]> = self
                    .subsampled_positions(step)
                    .iter()
                    .map(|p| [p.x as f64, p.y as f64, p.z as f64])
                    .collect();
                panic::catch_unwind(AssertUnwindSafe(|| delaunay::tetrahedralize_3d(&points)))
                    .unwrap_or_else(|_| {
                        log::warn!(
                            "could not compute the 3D Delaunay tetrahedralization of the geometry"
                        );
                        Vec::new()
                    })
            };
            cache.tetrahedra = Arc::new(tetrahedra);
            cache.triangles = Arc::new(Vec::new());
        }
        Arc::clone(&cache.tetrahedra)
    }

    /// Positions of every `step`-th cell, basis atom fastest, in the same
    /// ordering the simplex indices refer to.
    fn subsampled_positions(&self, step: usize) -> Vec<Vector3> {
        let [na, nb, nc] = self.n_cells;
        let mut points = Vec::new();
        for cell_c in (0..nc).step_by(step) {
            for cell_b in (0..nb).step_by(step) {
                for cell_a in (0..na).step_by(step) {
                    for iatom in 0..self.n_cell_atoms {
                        points.push(self.positions[self.site_index(iatom, [cell_a, cell_b, cell_c])]);
                    }
                }
            }
        }
        points
    }

    /// Six tetrahedra per unit cube, by direct offset-index arithmetic into
    /// the subsampled vertex ordering.
    fn regular_tetrahedra(&self, step: usize) -> Vec<Tetrahedron> {
        const CUBE_TETRAHEDRA: [[usize; 4]; 6] = [
            [0, 1, 5, 3],
            [1, 3, 2, 5],
            [3, 2, 5, 6],
            [7, 6, 5, 3],
            [4, 7, 5, 3],
            [0, 4, 3, 5],
        ];

        let sampled = [
            self.n_cells[0].div_ceil(step),
            self.n_cells[1].div_ceil(step),
            self.n_cells[2].div_ceil(step),
        ];
        let x_offset = 1;
        let y_offset = sampled[0];
        let z_offset = sampled[0] * sampled[1];
        let corner_offsets = [
            0,
            x_offset,
            x_offset + y_offset,
            y_offset,
            z_offset,
            x_offset + z_offset,
            x_offset + y_offset + z_offset,
            y_offset + z_offset,
        ];

        let mut tetrahedra = Vec::new();
        for iz in 0..sampled[2] - 1 {
            for iy in 0..sampled[1] - 1 {
                for ix in 0..sampled[0] - 1 {
                    let base = ix * x_offset + iy * y_offset + iz * z_offset;
                    for cell in &CUBE_TETRAHEDRA {
                        let mut tetrahedron = [0usize; 4];
                        for (k, &corner) in cell.iter().enumerate() {
                            tetrahedron[k] = base + corner_offsets[corner];
                        }
                        tetrahedra.push(tetrahedron);
                    }
                }
            }
        }
        tetrahedra
    }

    fn apply_cell_composition(&mut self) {
        let composition = self.cell_composition.clone();
        let [na_max, nb_max, nc_max] = self.n_cells;
        let mut rng = ChaCha8Rng::seed_from_u64(composition.seed);

        if composition.disordered {
            // Everything starts vacant; the dice decide what gets occupied.
            self.atom_types = IntField::filled(self.nos, VACANCY);
        }

        let mut visited = vec![false; self.n_cell_atoms];
        for na in 0..na_max {
            for nb in 0..nb_max {
                for nc in 0..nc_max {
                    visited.fill(false);

                    for entry in &composition.entries {
                        if visited[entry.iatom] {
                            continue;
                        }
                        let ispin = self.site_index(entry.iatom, [na, nb, nc]);

                        if composition.disordered {
                            let rvalue: Scalar = rng.gen_range(0.0..1.0);
                            if rvalue > entry.concentration {
                                continue;
                            }
                        }

                        self.atom_types[ispin] = entry.atom_type;
                        self.mu_s[ispin] = entry.mu_s;
                        visited[entry.iatom] = true;
                        if entry.atom_type < 0 {
                            self.nos_nonvacant -= 1;
                        }
                    }

                    if composition.disordered {
                        for iatom in 0..self.n_cell_atoms {
                            if !visited[iatom] {
                                let ispin = self.site_index(iatom, [na, nb, nc]);
                                self.mu_s[ispin] = 0.0;
                                self.nos_nonvacant -= 1;
                            }
                        }
                    }
                }
            }
        }
    }

    fn apply_boundary_pinning(&mut self, pinning: &Pinning) {
        let [na_max, nb_max, nc_max] = self.n_cells;
        let pinned_cell: Vec<Vector3> = if pinning.pinned_cell.is_empty() {
            vec![Vector3::zeros(); self.n_cell_atoms]
        } else {
            pinning.pinned_cell.clone()
        };

        for na in 0..na_max {
            for nb in 0..nb_max {
                for nc in 0..nc_max {
                    let pinned = na < pinning.na_left
                        || na + pinning.na_right >= na_max
                        || nb < pinning.nb_left
                        || nb + pinning.nb_right >= nb_max
                        || nc < pinning.nc_left
                        || nc + pinning.nc_right >= nc_max;
                    if !pinned {
                        continue;
                    }
                    for iatom in 0..self.n_cell_atoms {
                        let ispin = self.site_index(iatom, [na, nb, nc]);
                        self.mask_unpinned[ispin] = 0;
                        self.mask_pinned_cells[ispin] = pinned_cell[iatom];
                    }
                }
            }
        }
    }
}

fn validate_inputs(
    n_cells: &[usize; 3],
    cell_atoms: &[Vector3],
    composition: &CellComposition,
    pinning: &Pinning,
    defects: &Defects,
) -> Result<(), GeometryError> {
    if n_cells.iter().any(|&n| n == 0) {
        return Err(GeometryError::InvalidInput(format!(
            "cell counts must be nonzero, got {n_cells:?}"
        )));
    }
    if cell_atoms.is_empty() {
        return Err(GeometryError::InvalidInput(
            "the unit cell must contain at least one basis atom".into(),
        ));
    }
    for entry in &composition.entries {
        if entry.iatom >= cell_atoms.len() {
            return Err(GeometryError::InvalidInput(format!(
                "composition entry refers to basis atom {} but the cell has {}",
                entry.iatom,
                cell_atoms.len()
            )));
        }
    }
    if !pinning.pinned_cell.is_empty() && pinning.pinned_cell.len() != cell_atoms.len() {
        return Err(GeometryError::InvalidInput(format!(
            "pinned_cell must have one vector per basis atom ({}), got {}",
            cell_atoms.len(),
            pinning.pinned_cell.len()
        )));
    }
    if pinning.sites.len() != pinning.spins.len() {
        return Err(GeometryError::InvalidInput(
            "pinning sites and spins must have equal length".into(),
        ));
    }
    if defects.sites.len() != defects.types.len() {
        return Err(GeometryError::InvalidInput(
            "defect sites and types must have equal length".into(),
        ));
    }
    for site in pinning.sites.iter().chain(&defects.sites) {
        let in_range = site.basis < cell_atoms.len()
            && site.translations[0] < n_cells[0]
            && site.translations[1] < n_cells[1]
            && site.translations[2] < n_cells[2];
        if !in_range {
            return Err(GeometryError::InvalidInput(format!(
                "site (basis {}, translations {:?}) lies outside the lattice",
                site.basis, site.translations
            )));
        }
    }
    Ok(())
}

fn absolute_position(
    bravais: &BravaisVectors,
    cell_atom: &Vector3,
    translations: [Scalar; 3],
    lattice_constant: Scalar,
) -> Vector3 {
    (bravais[0] * (translations[0] + cell_atom.x)
        + bravais[1] * (translations[1] + cell_atom.y)
        + bravais[2] * (translations[2] + cell_atom.z))
        * lattice_constant
}

/// Fail fast when two basis atoms coincide under any lattice translation
/// within a bounded search window.
fn check_coincidence(
    bravais: &BravaisVectors,
    n_cells: &[usize; 3],
    cell_atoms: &[Vector3],
    lattice_constant: Scalar,
) -> Result<(), GeometryError> {
    let max_a = n_cells[0].min(10) as i64;
    let max_b = n_cells[1].min(10) as i64;
    let max_c = n_cells[2].min(10) as i64;

    for (i, atom_i) in cell_atoms.iter().enumerate() {
        for (j, atom_j) in cell_atoms.iter().enumerate() {
            for da in -max_a..=max_a {
                for db in -max_b..=max_b {
                    for dc in -max_c..=max_c {
                        if i == j && da == 0 && db == 0 && dc == 0 {
                            continue;
                        }
                        let shift =
                            Vector3::new(da as Scalar, db as Scalar, dc as Scalar);
                        let diff = atom_i - (atom_j + shift);
                        if diff.x.abs() < EPSILON
                            && diff.y.abs() < EPSILON
                            && diff.z.abs() < EPSILON
                        {
                            let position = absolute_position(
                                bravais,
                                atom_i,
                                [da as Scalar, db as Scalar, dc as Scalar],
                                lattice_constant,
                            );
                            return Err(GeometryError::CoincidentSites {
                                i,
                                j,
                                da,
                                db,
                                dc,
                                x: position.x,
                                y: position.y,
                                z: position.z,
                                epsilon: EPSILON,
                            });
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn generate_positions(
    bravais: &BravaisVectors,
    n_cells: &[usize; 3],
    cell_atoms: &[Vector3],
    lattice_constant: Scalar,
) -> VectorField {
    let n = cell_atoms.len();
    let mut positions = VectorField::zeros(n * n_cells[0] * n_cells[1] * n_cells[2]);
    for dc in 0..n_cells[2] {
        for db in 0..n_cells[1] {
            for da in 0..n_cells[0] {
                for (iatom, cell_atom) in cell_atoms.iter().enumerate() {
                    let ispin = iatom + n * (da + n_cells[0] * (db + n_cells[1] * dc));
                    positions[ispin] = absolute_position(
                        bravais,
                        cell_atom,
                        [da as Scalar, db as Scalar, dc as Scalar],
                        lattice_constant,
                    );
                }
            }
        }
    }
    positions
}

fn bounds_of(positions: &VectorField) -> (Vector3, Vector3) {
    let mut min = positions[0];
    let mut max = positions[0];
    for p in positions.as_slice() {
        min = Vector3::new(min.x.min(p.x), min.y.min(p.y), min.z.min(p.z));
        max = Vector3::new(max.x.max(p.x), max.y.max(p.y), max.z.max(p.z));
    }
    (min, max)
}

/// Bounding box of one unit cell, from the +-1 lattice-translation
/// neighbours of every basis atom.
fn unit_cell_bounds(
    bravais: &BravaisVectors,
    positions: &VectorField,
    n_cell_atoms: usize,
    lattice_constant: Scalar,
) -> (Vector3, Vector3) {
    let mut min = Vector3::zeros();
    let mut max = Vector3::zeros();
    for vector in bravais {
        for iatom in 0..n_cell_atoms {
            for neighbour in [
                positions[iatom] + vector * lattice_constant,
                positions[iatom] - vector * lattice_constant,
            ] {
                min = Vector3::new(min.x.min(neighbour.x), min.y.min(neighbour.y), min.z.min(neighbour.z));
                max = Vector3::new(max.x.max(neighbour.x), max.y.max(neighbour.y), max.z.max(neighbour.z));
            }
        }
    }
    (min * 0.5, max * 0.5)
}

fn parallel(a: &Vector3, b: &Vector3) -> bool {
    (a.dot(b).abs() - 1.0).abs() < EPSILON
}

/// Rank of the basis-atom displacement set: 0 for a single atom, 1 when all
/// displacements are colinear, 2 when coplanar, 3 otherwise. Returns the
/// rank and a representative direction (line direction or plane normal).
fn basis_rank(positions: &VectorField, n_cell_atoms: usize) -> (usize, Vector3) {
    if n_cell_atoms == 1 {
        return (0, Vector3::zeros());
    }
    if n_cell_atoms == 2 {
        return (1, (positions[0] - positions[1]).normalize());
    }

    let v0 = positions[0];
    let displacements: Vec<Vector3> = (1..n_cell_atoms)
        .map(|i| (positions[i] - v0).normalize())
        .collect();

    let line = displacements[0];
    let mut n_parallel = 0;
    for d in &displacements[1..] {
        if parallel(d, &line) {
            n_parallel += 1;
        } else {
            break;
        }
    }
    if n_parallel == displacements.len() - 1 {
        return (1, line);
    }

    let normal = line.cross(&displacements[n_parallel + 1]).normalize();
    let n_in_plane = displacements[2..]
        .iter()
        .filter(|d| d.dot(&normal).abs() < EPSILON)
        .count();
    if n_in_plane == displacements.len() - 2 {
        (2, normal)
    } else {
        (3, Vector3::zeros())
    }
}

/// Rank of the Bravais vectors actually used (axes with more than one
/// cell), plus a representative direction.
fn translation_rank(
    bravais: &BravaisVectors,
    n_cells: &[usize; 3],
) -> (usize, Vector3) {
    let used = [n_cells[0] > 1, n_cells[1] > 1, n_cells[2] > 1];
    if !used.iter().any(|&u| u) {
        return (0, Vector3::zeros());
    }

    let unit: Vec<Vector3> = bravais.iter().map(|v| v.normalize()).collect();
    let mut n_independent_pairs = 0;
    for (a, b) in [(0, 1), (0, 2), (1, 2)] {
        if used[a] && used[b] && !parallel(&unit[a], &unit[b]) {
            n_independent_pairs += 1;
        }
    }

    if n_independent_pairs == 0 {
        let mut direction = Vector3::zeros();
        for d in 0..3 {
            if used[d] {
                direction = unit[d];
            }
        }
        (1, direction)
    } else if n_independent_pairs < 3 {
        let plane: Vec<Vector3> = (0..3).filter(|&d| used[d]).map(|d| unit[d]).collect();
        (2, plane[0].cross(&plane[1]).normalize())
    } else {
        (3, Vector3::zeros())
    }
}

/// Combine basis and translation ranks into the lattice's effective
/// dimensionality. The representative directions decide whether the two
/// sub-structures overlap (parallel line/normal) or extend each other.
fn infer_dimensionality(
    bravais: &BravaisVectors,
    n_cells: &[usize; 3],
    positions: &VectorField,
    n_cell_atoms: usize,
) -> usize {
    let (dims_basis, dir_basis) = basis_rank(positions, n_cell_atoms);
    if dims_basis == 3 {
        return 3;
    }
    let (dims_translations, dir_translations) = translation_rank(bravais, n_cells);
    if dims_translations == 3 {
        return 3;
    }

    if dims_basis == 0 {
        return dims_translations;
    }
    if dims_translations == 0 {
        return dims_basis;
    }

    if dims_basis == dims_translations {
        if parallel(&dir_basis, &dir_translations) {
            dims_basis
        } else if dims_basis == 1 {
            2
        } else {
            3
        }
    } else {
        // One is a line and the other a plane: the line either lies in the
        // plane (direction orthogonal to the normal) or leaves it.
        if dir_basis.dot(&dir_translations).abs() < EPSILON {
            2
        } else {
            3
        }
    }
}

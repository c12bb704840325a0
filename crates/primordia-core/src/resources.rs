//! Diffusing and global scalar resources, consumed and replenished every
//! time slice.

use serde::{Deserialize, Serialize};

/// Spatial layout of a single resource.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResourceGeometry {
    /// One well-mixed level shared by the whole world.
    #[default]
    Global,
    /// Per-cell levels on a bounded grid (no flux across the boundary).
    Grid,
    /// Per-cell levels with toroidal wrap.
    Torus,
}

/// Inclusive cell-coordinate window used for spatial inflow and outflow.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ResourceWindow {
    pub x1: u32,
    pub x2: u32,
    pub y1: u32,
    pub y2: u32,
}

impl ResourceWindow {
    #[must_use]
    pub const fn new(x1: u32, x2: u32, y1: u32, y2: u32) -> Self {
        Self { x1, x2, y1, y2 }
    }

    fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x1 && x <= self.x2 && y >= self.y1 && y <= self.y2
    }

    fn area(&self) -> f64 {
        let w = self.x2.saturating_sub(self.x1) + 1;
        let h = self.y2.saturating_sub(self.y1) + 1;
        f64::from(w) * f64::from(h)
    }
}

/// Per-resource rate and geometry description.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceConfig {
    pub name: String,
    /// Level seeded at construction.
    pub initial: f64,
    /// Units added per unit of virtual time.
    pub inflow: f64,
    /// Fraction drained per unit of virtual time; decay is `1 - outflow`.
    pub outflow: f64,
    pub geometry: ResourceGeometry,
    /// Diffusion coefficients along each axis.
    pub x_diffuse: f64,
    pub y_diffuse: f64,
    /// Drift of matter toward +x / +y (negative values drift the other way).
    pub x_gravity: f64,
    pub y_gravity: f64,
    /// Window receiving inflow for spatial resources.
    pub inflow_window: ResourceWindow,
    /// Window subject to outflow for spatial resources.
    pub outflow_window: ResourceWindow,
}

impl ResourceConfig {
    /// A well-mixed global resource with the given rates.
    #[must_use]
    pub fn global(name: impl Into<String>, initial: f64, inflow: f64, outflow: f64) -> Self {
        Self {
            name: name.into(),
            initial,
            inflow,
            outflow,
            geometry: ResourceGeometry::Global,
            x_diffuse: 0.0,
            y_diffuse: 0.0,
            x_gravity: 0.0,
            y_gravity: 0.0,
            inflow_window: ResourceWindow::default(),
            outflow_window: ResourceWindow::default(),
        }
    }

    fn decay(&self) -> f64 {
        1.0 - self.outflow
    }
}

/// Per-cell levels for one spatial resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SpatialPool {
    levels: Vec<f64>,
}

/// All resource state for a population: a scalar level per resource plus a
/// `world_x x world_y` pool for the spatial ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceField {
    configs: Vec<ResourceConfig>,
    levels: Vec<f64>,
    pools: Vec<Option<SpatialPool>>,
    world_x: u32,
    world_y: u32,
}

impl ResourceField {
    /// Builds the field, seeding every resource at its initial level.
    /// Spatial resources spread the initial amount uniformly.
    #[must_use]
    pub fn new(configs: Vec<ResourceConfig>, world_x: u32, world_y: u32) -> Self {
        let num_cells = (world_x as usize) * (world_y as usize);
        let levels = configs.iter().map(|c| c.initial).collect();
        let pools = configs
            .iter()
            .map(|config| match config.geometry {
                ResourceGeometry::Global => None,
                ResourceGeometry::Grid | ResourceGeometry::Torus => Some(SpatialPool {
                    levels: vec![config.initial / num_cells as f64; num_cells],
                }),
            })
            .collect();
        Self {
            configs,
            levels,
            pools,
            world_x,
            world_y,
        }
    }

    #[must_use]
    pub fn num_resources(&self) -> usize {
        self.configs.len()
    }

    #[must_use]
    pub fn configs(&self) -> &[ResourceConfig] {
        &self.configs
    }

    /// Current level of resource `id`; negative levels read as zero. For
    /// spatial resources this is the sum over all cells.
    #[must_use]
    pub fn level(&self, id: usize) -> f64 {
        match &self.pools[id] {
            Some(pool) => pool.levels.iter().sum::<f64>().max(0.0),
            None => self.levels[id].max(0.0),
        }
    }

    /// All levels, clamped, in resource order.
    #[must_use]
    pub fn levels(&self) -> Vec<f64> {
        (0..self.configs.len()).map(|id| self.level(id)).collect()
    }

    /// Levels visible from one cell: the per-cell amount for spatial
    /// resources, the shared level otherwise.
    #[must_use]
    pub fn cell_levels(&self, cell_id: usize) -> Vec<f64> {
        self.configs
            .iter()
            .enumerate()
            .map(|(id, _)| match &self.pools[id] {
                Some(pool) => pool.levels[cell_id].max(0.0),
                None => self.levels[id].max(0.0),
            })
            .collect()
    }

    /// Externally adjusts resource `id` (organism consumption or release).
    pub fn modify(&mut self, id: usize, delta: f64) {
        match &mut self.pools[id] {
            Some(pool) => {
                // Spread the change uniformly; per-cell clamp happens on read.
                let per_cell = delta / pool.levels.len() as f64;
                for level in &mut pool.levels {
                    *level += per_cell;
                }
            }
            None => self.levels[id] += delta,
        }
    }

    /// Adjusts every resource by the matching entry of `deltas`.
    pub fn modify_all(&mut self, deltas: &[f64]) {
        for (id, &delta) in deltas.iter().enumerate().take(self.configs.len()) {
            self.modify(id, delta);
        }
    }

    /// Adjusts the levels seen from `cell_id`, one delta per resource.
    /// Spatial changes that would drive the cell negative are clamped.
    pub fn modify_cell(&mut self, deltas: &[f64], cell_id: usize) {
        for (id, &delta) in deltas.iter().enumerate().take(self.configs.len()) {
            match &mut self.pools[id] {
                Some(pool) => {
                    let level = &mut pool.levels[cell_id];
                    *level = (*level + delta).max(0.0);
                }
                None => self.levels[id] += delta,
            }
        }
    }

    /// Overrides the level of resource `id`. Spatial resources are reset to
    /// a uniform distribution of the new total.
    pub fn set(&mut self, id: usize, level: f64) {
        match &mut self.pools[id] {
            Some(pool) => {
                let per_cell = level / pool.levels.len() as f64;
                pool.levels.fill(per_cell);
            }
            None => self.levels[id] = level,
        }
        self.levels[id] = level;
    }

    /// Advances every resource by `dt` units of virtual time.
    ///
    /// Global resources integrate `level * decay^dt + inflow * dt`,
    /// preserving the steady state `inflow / (1 - decay)`. Spatial
    /// resources apply windowed inflow/outflow, then diffusion and drift.
    pub fn update(&mut self, dt: f64) {
        for id in 0..self.configs.len() {
            let config = self.configs[id].clone();
            match &mut self.pools[id] {
                None => {
                    let decay = config.decay().max(0.0);
                    self.levels[id] = self.levels[id] * decay.powf(dt) + config.inflow * dt;
                }
                Some(pool) => {
                    Self::update_spatial(pool, &config, self.world_x, self.world_y, dt);
                }
            }
        }
    }

    fn update_spatial(pool: &mut SpatialPool, config: &ResourceConfig, world_x: u32, world_y: u32, dt: f64) {
        let width = world_x as usize;
        let height = world_y as usize;

        // Windowed inflow and outflow.
        let inflow_area = config.inflow_window.area();
        let decay = config.decay().max(0.0).powf(dt);
        for y in 0..height {
            for x in 0..width {
                let idx = y * width + x;
                if config.inflow > 0.0 && config.inflow_window.contains(x as u32, y as u32) {
                    pool.levels[idx] += config.inflow * dt / inflow_area;
                }
                if config.outflow > 0.0 && config.outflow_window.contains(x as u32, y as u32) {
                    pool.levels[idx] *= decay;
                }
            }
        }

        let wrap = config.geometry == ResourceGeometry::Torus;
        let neighbor = |x: usize, y: usize, dx: i32, dy: i32| -> Option<usize> {
            let nx = x as i64 + i64::from(dx);
            let ny = y as i64 + i64::from(dy);
            if wrap {
                let nx = nx.rem_euclid(width as i64) as usize;
                let ny = ny.rem_euclid(height as i64) as usize;
                Some(ny * width + nx)
            } else if nx >= 0 && nx < width as i64 && ny >= 0 && ny < height as i64 {
                Some((ny as usize) * width + nx as usize)
            } else {
                None
            }
        };

        // Diffusion: each cell relaxes toward its axis neighbors. The
        // exchanged fraction is symmetric, so total matter is conserved
        // (no-flux at bounded edges).
        if config.x_diffuse > 0.0 || config.y_diffuse > 0.0 {
            let old = pool.levels.clone();
            for y in 0..height {
                for x in 0..width {
                    let idx = y * width + x;
                    let mut delta = 0.0;
                    for (dx, dy, rate) in [
                        (-1, 0, config.x_diffuse),
                        (1, 0, config.x_diffuse),
                        (0, -1, config.y_diffuse),
                        (0, 1, config.y_diffuse),
                    ] {
                        if rate <= 0.0 {
                            continue;
                        }
                        if let Some(n) = neighbor(x, y, dx, dy) {
                            delta += rate * dt * 0.5 * (old[n] - old[idx]);
                        }
                    }
                    pool.levels[idx] += delta;
                }
            }
        }

        // Gravity drift: a fraction of each cell's matter slides one cell
        // along the signed axis direction.
        if config.x_gravity != 0.0 || config.y_gravity != 0.0 {
            let old = pool.levels.clone();
            for y in 0..height {
                for x in 0..width {
                    let idx = y * width + x;
                    for (gravity, dx, dy) in [
                        (config.x_gravity, config.x_gravity.signum() as i32, 0),
                        (config.y_gravity, 0, config.y_gravity.signum() as i32),
                    ] {
                        let moved = old[idx] * gravity.abs().min(1.0) * dt;
                        if moved <= 0.0 {
                            continue;
                        }
                        if let Some(n) = neighbor(x, y, dx, dy) {
                            pool.levels[idx] -= moved;
                            pool.levels[n] += moved;
                        }
                    }
                }
            }
        }

        for level in &mut pool.levels {
            if *level < 0.0 {
                *level = 0.0;
            }
        }
    }
}

use ndarray::{Array2, Zip};

/// Directional light for hillshading (azimuth clockwise from north, altitude above horizon)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightSource {
    pub azimuth_deg: f64,
    pub altitude_deg: f64,
}

impl Default for LightSource {
    fn default() -> Self {
        Self::new(315.0, 45.0)
    }
}

impl LightSource {
    pub fn new(azimuth_deg: f64, altitude_deg: f64) -> Self {
        Self { azimuth_deg, altitude_deg }
    }

    /// Unit vector pointing towards the light, in (x, y, z) grid space
    pub fn direction(&self) -> [f64; 3] {
        let az = (90.0 - self.azimuth_deg).to_radians();
        let alt = self.altitude_deg.to_radians();
        [az.cos() * alt.cos(), az.sin() * alt.cos(), alt.sin()]
    }

    /// Illumination intensity in 0..1 for each cell of an elevation grid
    ///
    /// Gradients use central differences with one-sided edges. The intensity is
    /// stretched to the full 0..1 range unless it is (nearly) constant.
    pub fn hillshade(&self, elevation: &Array2<f32>, vert_exag: f64, dx: f64, dy: f64) -> Array2<f32> {
        let scaled = elevation.mapv(|v| v as f64 * vert_exag);
        let (grad_y, grad_x) = gradient(&scaled, dy, dx);
        let direction = self.direction();

        let shade = |gx: &f64, gy: &f64| {
            let norm = (gx * gx + gy * gy + 1.0).sqrt();
            (-gx * direction[0] - gy * direction[1] + direction[2]) / norm
        };

        #[cfg(feature = "parallel")]
        let intensity = Zip::from(&grad_x).and(&grad_y).par_map_collect(shade);
        #[cfg(not(feature = "parallel"))]
        let intensity = Zip::from(&grad_x).and(&grad_y).map_collect(shade);

        let (imin, imax) = intensity
            .iter()
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let stretch = imax - imin > 1e-6;

        intensity.mapv(|v| {
            let v = if stretch { (v - imin) / (imax - imin) } else { v };
            v.clamp(0.0, 1.0) as f32
        })
    }
}

/// Partial derivatives along rows and columns, returned as (d/drow, d/dcol)
pub fn gradient(values: &Array2<f64>, row_spacing: f64, col_spacing: f64) -> (Array2<f64>, Array2<f64>) {
    let (rows, cols) = values.dim();
    let mut d_row = Array2::zeros((rows, cols));
    let mut d_col = Array2::zeros((rows, cols));

    if rows > 1 {
        for j in 0..cols {
            d_row[[0, j]] = (values[[1, j]] - values[[0, j]]) / row_spacing;
            d_row[[rows - 1, j]] = (values[[rows - 1, j]] - values[[rows - 2, j]]) / row_spacing;
            for i in 1..rows - 1 {
                d_row[[i, j]] = (values[[i + 1, j]] - values[[i - 1, j]]) / (2.0 * row_spacing);
            }
        }
    }

    if cols > 1 {
        for i in 0..rows {
            d_col[[i, 0]] = (values[[i, 1]] - values[[i, 0]]) / col_spacing;
            d_col[[i, cols - 1]] = (values[[i, cols - 1]] - values[[i, cols - 2]]) / col_spacing;
            for j in 1..cols - 1 {
                d_col[[i, j]] = (values[[i, j + 1]] - values[[i, j - 1]]) / (2.0 * col_spacing);
            }
        }
    }

    (d_row, d_col)
}

/// `count` evenly spaced levels strictly between `min` and `max`
pub fn contour_levels(min: f64, max: f64, count: usize) -> Vec<f64> {
    if count == 0 || !(max > min) {
        return Vec::new();
    }
    let step = (max - min) / (count + 1) as f64;
    (1..=count).map(|k| min + step * k as f64).collect()
}

/// A straight piece of an isoline, in (lon, lat)
pub type Segment = ((f64, f64), (f64, f64));

/// All segments of the isoline at one level
#[derive(Debug, Clone, PartialEq)]
pub struct ContourLine {
    pub level: f64,
    pub segments: Vec<Segment>,
}

#[derive(Clone, Copy)]
enum Edge {
    Bottom,
    Right,
    Top,
    Left,
}

/// Marching squares over a grid whose row `i` sits at `lats[i]` and column `j` at `lons[j]`
pub fn marching_squares(values: &Array2<f32>, lons: &[f64], lats: &[f64], level: f64) -> ContourLine {
    let (rows, cols) = values.dim();
    let mut segments = Vec::new();

    for i in 0..rows.saturating_sub(1) {
        for j in 0..cols.saturating_sub(1) {
            // corners counter-clockwise from south-west
            let a = values[[i, j]] as f64;
            let b = values[[i, j + 1]] as f64;
            let c = values[[i + 1, j + 1]] as f64;
            let d = values[[i + 1, j]] as f64;
            if !(a.is_finite() && b.is_finite() && c.is_finite() && d.is_finite()) {
                continue;
            }

            let case = (a >= level) as u8
                | ((b >= level) as u8) << 1
                | ((c >= level) as u8) << 2
                | ((d >= level) as u8) << 3;

            let point = |edge: Edge| -> (f64, f64) {
                let cross = |v1: f64, v2: f64| (level - v1) / (v2 - v1);
                match edge {
                    Edge::Bottom => (lons[j] + cross(a, b) * (lons[j + 1] - lons[j]), lats[i]),
                    Edge::Right => (lons[j + 1], lats[i] + cross(b, c) * (lats[i + 1] - lats[i])),
                    Edge::Top => (lons[j] + cross(d, c) * (lons[j + 1] - lons[j]), lats[i + 1]),
                    Edge::Left => (lons[j], lats[i] + cross(a, d) * (lats[i + 1] - lats[i])),
                }
            };
            let center_above = (a + b + c + d) / 4.0 >= level;

            let pairs: &[(Edge, Edge)] = match case {
                1 | 14 => &[(Edge::Left, Edge::Bottom)],
                2 | 13 => &[(Edge::Bottom, Edge::Right)],
                3 | 12 => &[(Edge::Left, Edge::Right)],
                4 | 11 => &[(Edge::Right, Edge::Top)],
                6 | 9 => &[(Edge::Bottom, Edge::Top)],
                7 | 8 => &[(Edge::Left, Edge::Top)],
                5 if center_above => &[(Edge::Bottom, Edge::Right), (Edge::Top, Edge::Left)],
                5 => &[(Edge::Left, Edge::Bottom), (Edge::Right, Edge::Top)],
                10 if center_above => &[(Edge::Left, Edge::Bottom), (Edge::Right, Edge::Top)],
                10 => &[(Edge::Bottom, Edge::Right), (Edge::Top, Edge::Left)],
                _ => &[],
            };

            for &(from, to) in pairs {
                segments.push((point(from), point(to)));
            }
        }
    }

    ContourLine { level, segments }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_light_direction() {
        let light = LightSource::default();
        let d = light.direction();
        // north-west light: x (east) negative, y (north) positive
        assert!(d[0] < 0.0 && d[1] > 0.0);
        assert_abs_diff_eq!(d[2], 45f64.to_radians().sin(), epsilon = 1e-12);
        assert_abs_diff_eq!(d.iter().map(|v| v * v).sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_light_from_east_brightens_east_slope() {
        // elevation falls towards the east, so the slope faces east
        let ramp = Array2::from_shape_fn((5, 5), |(_, j)| (10 - 2 * j) as f32);
        let east = LightSource::new(90.0, 30.0);
        let west = LightSource::new(270.0, 30.0);
        assert_abs_diff_eq!(east.direction()[0], 30f64.to_radians().cos(), epsilon = 1e-12);

        // a plane has uniform intensity, so no stretch applies
        let lit = east.hillshade(&ramp, 1.0, 1.0, 1.0);
        let shadowed = west.hillshade(&ramp, 1.0, 1.0, 1.0);
        assert!(lit.iter().all(|&v| v > 0.9));
        assert!(shadowed.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_flat_hillshade_is_uniform() {
        let flat = Array2::<f32>::from_elem((5, 5), 120.0);
        let shade = LightSource::default().hillshade(&flat, 1.5, 1.0, 1.0);
        for &v in shade.iter() {
            assert_abs_diff_eq!(v, 45f32.to_radians().sin(), epsilon = 1e-5);
        }
    }

    #[test]
    fn test_hillshade_stretched_to_unit_range() {
        let mut bump = Array2::<f32>::zeros((7, 7));
        bump[[3, 3]] = 50.0;
        bump[[3, 4]] = 25.0;
        let shade = LightSource::default().hillshade(&bump, 1.5, 1.0, 1.0);
        let min = shade.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = shade.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        assert_abs_diff_eq!(min, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(max, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_gradient_edges_one_sided() {
        let values = array![[0.0, 1.0, 4.0], [0.0, 1.0, 4.0]];
        let (d_row, d_col) = gradient(&values, 1.0, 1.0);
        assert_eq!(d_col.row(0).to_vec(), vec![1.0, 2.0, 3.0]);
        assert!(d_row.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_contour_levels() {
        assert_eq!(contour_levels(0.0, 100.0, 3), vec![25.0, 50.0, 75.0]);
        assert!(contour_levels(0.0, 100.0, 0).is_empty());
        assert!(contour_levels(5.0, 5.0, 4).is_empty());
    }

    #[test]
    fn test_marching_squares_horizontal_line() {
        let values = array![[0.0f32, 0.0], [10.0, 10.0]];
        let line = marching_squares(&values, &[0.0, 1.0], &[0.0, 1.0], 5.0);
        assert_eq!(line.segments.len(), 1);
        let ((x0, y0), (x1, y1)) = line.segments[0];
        assert_abs_diff_eq!(y0, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(y1, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!((x0 - x1).abs(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_marching_squares_saddle_and_nan() {
        let saddle = array![[10.0f32, 0.0], [0.0, 10.0]];
        let line = marching_squares(&saddle, &[0.0, 1.0], &[0.0, 1.0], 5.0);
        assert_eq!(line.segments.len(), 2);

        let holes = array![[f32::NAN, 0.0], [10.0, 10.0]];
        let line = marching_squares(&holes, &[0.0, 1.0], &[0.0, 1.0], 5.0);
        assert!(line.segments.is_empty());
    }
}

//! Synthetic GRIB message encoders.
//!
//! Produce small but structurally valid GRIB edition 1 and edition 2
//! messages with simple packing. `NaN` values become masked points via a
//! bitmap section.

/// Grid and packing settings shared by both encoders.
#[derive(Debug, Clone)]
struct GridLayout {
    ni: usize,
    nj: usize,
    first_lat: f64,
    first_lon: f64,
    di: f64,
    dj: f64,
    scanning_mode: u8,
    increments_given: bool,
}

impl GridLayout {
    fn new() -> Self {
        // 3x3 box around the Leixões buoy, 0.25 degree spacing
        Self {
            ni: 3,
            nj: 3,
            first_lat: 41.25,
            first_lon: -9.75,
            di: 0.25,
            dj: 0.25,
            scanning_mode: 0,
            increments_given: true,
        }
    }

    fn num_points(&self) -> usize {
        self.ni * self.nj
    }

    fn last_lat(&self) -> f64 {
        let span = (self.nj.saturating_sub(1)) as f64 * self.dj;
        if self.scanning_mode & 0x40 != 0 {
            self.first_lat + span
        } else {
            self.first_lat - span
        }
    }

    fn last_lon(&self) -> f64 {
        let span = (self.ni.saturating_sub(1)) as f64 * self.di;
        if self.scanning_mode & 0x80 != 0 {
            self.first_lon - span
        } else {
            self.first_lon + span
        }
    }
}

/// Simple packing parameters computed for a set of values.
struct Packed {
    reference_value: f64,
    binary_scale_factor: i16,
    bits_per_value: u8,
    data: Vec<u8>,
    bitmap: Option<Vec<u8>>,
}

/// Pack `values` (already multiplied by 10^D) with 16 bits per value.
///
/// `encode_reference` rounds the reference value to its on-the-wire
/// precision so packed integers are computed against the decoded reference.
fn pack(values: &[f64], encode_reference: impl Fn(f64) -> f64) -> Packed {
    let present: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    let bitmap = if present.len() < values.len() {
        let mut bits = vec![0u8; values.len().div_ceil(8)];
        for (i, v) in values.iter().enumerate() {
            if !v.is_nan() {
                bits[i / 8] |= 0x80 >> (i % 8);
            }
        }
        Some(bits)
    } else {
        None
    };

    let min = present.iter().copied().fold(f64::INFINITY, f64::min);
    let max = present.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if present.is_empty() {
        return Packed {
            reference_value: 0.0,
            binary_scale_factor: 0,
            bits_per_value: 0,
            data: Vec::new(),
            bitmap,
        };
    }

    let reference_value = encode_reference(min);
    let range = max - reference_value;
    if range <= 0.0 {
        return Packed {
            reference_value,
            binary_scale_factor: 0,
            bits_per_value: 0,
            data: Vec::new(),
            bitmap,
        };
    }

    let binary_scale_factor = (range / 65535.0).log2().ceil() as i16;
    let binary_scale = 2.0_f64.powi(binary_scale_factor as i32);

    let mut data = Vec::with_capacity(present.len() * 2);
    for v in present {
        let x = ((v - reference_value) / binary_scale).round().clamp(0.0, 65535.0) as u16;
        data.extend_from_slice(&x.to_be_bytes());
    }

    Packed {
        reference_value,
        binary_scale_factor,
        bits_per_value: 16,
        data,
        bitmap,
    }
}

/// Encode a sign-magnitude integer in `octets` bytes.
pub fn sign_magnitude(value: i64, octets: usize) -> Vec<u8> {
    let magnitude = value.unsigned_abs();
    let mut bytes = magnitude.to_be_bytes()[8 - octets..].to_vec();
    if value < 0 {
        bytes[0] |= 0x80;
    }
    bytes
}

/// Encode an IBM System/360 single precision float.
///
/// The result never exceeds `value`, so it is safe as a packing reference.
pub fn ibm_from_f64(value: f64) -> [u8; 4] {
    if value == 0.0 || !value.is_finite() {
        return [0; 4];
    }

    let negative = value < 0.0;
    let magnitude = value.abs();
    let mut exponent = (magnitude.log2() / 4.0).floor() as i32 + 1;
    let mut fraction = magnitude / 16.0_f64.powi(exponent);
    while fraction >= 1.0 {
        fraction /= 16.0;
        exponent += 1;
    }
    while fraction < 1.0 / 16.0 {
        fraction *= 16.0;
        exponent -= 1;
    }

    let scaled = fraction * 16_777_216.0;
    let mut mantissa = if negative { scaled.ceil() } else { scaled.floor() } as u32;
    if mantissa >= 1 << 24 {
        mantissa >>= 4;
        exponent += 1;
    }

    let biased = (exponent + 64).clamp(0, 127) as u8;
    let [_, m0, m1, m2] = mantissa.to_be_bytes();
    [biased | if negative { 0x80 } else { 0 }, m0, m1, m2]
}

fn decode_ibm(bytes: [u8; 4]) -> f64 {
    let sign = if bytes[0] & 0x80 != 0 { -1.0 } else { 1.0 };
    let exponent = (bytes[0] & 0x7F) as i32 - 64;
    let mantissa = u32::from_be_bytes([0, bytes[1], bytes[2], bytes[3]]);
    sign * mantissa as f64 / 16_777_216.0 * 16.0_f64.powi(exponent)
}

fn scaled_values(values: &[f64], decimal_scale: i16) -> Vec<f64> {
    let factor = 10.0_f64.powi(decimal_scale as i32);
    values.iter().map(|v| v * factor).collect()
}

fn push_u24(buf: &mut Vec<u8>, value: usize) {
    let [_, a, b, c] = (value as u32).to_be_bytes();
    buf.extend_from_slice(&[a, b, c]);
}

/// Build a GRIB edition 1 message, ECMWF style.
#[derive(Debug, Clone)]
pub struct Grib1Builder {
    table_version: u8,
    parameter: u8,
    centre: u8,
    year: i32,
    month: u8,
    day: u8,
    hour: u8,
    time_unit: u8,
    p1: u8,
    p2: u8,
    time_range_indicator: u8,
    decimal_scale: i16,
    grid: GridLayout,
    values: Vec<f64>,
}

impl Default for Grib1Builder {
    fn default() -> Self {
        Self::new(140, 229)
    }
}

impl Grib1Builder {
    /// New analysis message for `(table_version, parameter)`, valid at
    /// 2024-01-01 00:00 UTC on the default 3x3 grid.
    pub fn new(table_version: u8, parameter: u8) -> Self {
        let grid = GridLayout::new();
        let values = vec![0.0; grid.num_points()];
        Self {
            table_version,
            parameter,
            centre: 98,
            year: 2024,
            month: 1,
            day: 1,
            hour: 0,
            time_unit: 1,
            p1: 0,
            p2: 0,
            time_range_indicator: 0,
            decimal_scale: 0,
            grid,
            values,
        }
    }

    pub fn with_reference_time(mut self, year: i32, month: u8, day: u8, hour: u8) -> Self {
        self.year = year;
        self.month = month;
        self.day = day;
        self.hour = hour;
        self
    }

    /// Forecast step in hours (time range indicator 0).
    pub fn with_forecast_hours(mut self, p1: u8) -> Self {
        self.p1 = p1;
        self.time_range_indicator = 0;
        self
    }

    pub fn with_time_range(mut self, time_unit: u8, p1: u8, p2: u8, indicator: u8) -> Self {
        self.time_unit = time_unit;
        self.p1 = p1;
        self.p2 = p2;
        self.time_range_indicator = indicator;
        self
    }

    /// Regular grid starting at (`first_lat`, `first_lon`), scanning west to
    /// east and north to south. Resets values to zero.
    pub fn with_grid(mut self, first_lat: f64, first_lon: f64, ni: usize, nj: usize, step: f64) -> Self {
        self.grid.first_lat = first_lat;
        self.grid.first_lon = first_lon;
        self.grid.ni = ni;
        self.grid.nj = nj;
        self.grid.di = step;
        self.grid.dj = step;
        self.values = vec![0.0; ni * nj];
        self
    }

    pub fn with_scanning_mode(mut self, scanning_mode: u8) -> Self {
        self.grid.scanning_mode = scanning_mode;
        self
    }

    /// Omit the increments so readers must derive them from the corners.
    pub fn without_increments(mut self) -> Self {
        self.grid.increments_given = false;
        self
    }

    pub fn with_decimal_scale(mut self, decimal_scale: i16) -> Self {
        self.decimal_scale = decimal_scale;
        self
    }

    /// Values in storage order. `NaN` marks a masked point.
    pub fn with_values(mut self, values: Vec<f64>) -> Self {
        self.values = values;
        self
    }

    pub fn with_constant_value(mut self, value: f64) -> Self {
        self.values = vec![value; self.grid.num_points()];
        self
    }

    /// Fill values from a function of (lat, lon) using the builder's scanning
    /// mode.
    pub fn with_field(mut self, f: impl Fn(f64, f64) -> f64) -> Self {
        self.values = grid_points(&self.grid)
            .into_iter()
            .map(|(lat, lon)| f(lat, lon))
            .collect();
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let scaled = scaled_values(&self.values, self.decimal_scale);
        let packed = pack(&scaled, |min| decode_ibm(ibm_from_f64(min)));

        let pds = self.product_definition(packed.bitmap.is_some());
        let gds = self.grid_description();
        let bms = packed.bitmap.as_ref().map(|bits| bitmap_section(bits, self.values.len()));
        let bds = binary_data_section(&packed);

        let total = 8 + pds.len() + gds.len() + bms.as_ref().map_or(0, Vec::len) + bds.len() + 4;

        let mut message = Vec::with_capacity(total);
        message.extend_from_slice(b"GRIB");
        push_u24(&mut message, total);
        message.push(1);
        message.extend_from_slice(&pds);
        message.extend_from_slice(&gds);
        if let Some(bms) = bms {
            message.extend_from_slice(&bms);
        }
        message.extend_from_slice(&bds);
        message.extend_from_slice(b"7777");
        message
    }

    fn product_definition(&self, has_bitmap: bool) -> Vec<u8> {
        let century = (self.year - 1) / 100 + 1;
        let year_of_century = self.year - (century - 1) * 100;

        let mut section = Vec::with_capacity(28);
        push_u24(&mut section, 28);
        section.push(self.table_version);
        section.push(self.centre);
        section.push(145); // Generating process
        section.push(255); // Grid defined by GDS
        section.push(0x80 | if has_bitmap { 0x40 } else { 0 });
        section.push(self.parameter);
        section.push(1); // Surface
        section.extend_from_slice(&0u16.to_be_bytes());
        section.push(year_of_century as u8);
        section.push(self.month);
        section.push(self.day);
        section.push(self.hour);
        section.push(0); // Minute
        section.push(self.time_unit);
        section.push(self.p1);
        section.push(self.p2);
        section.push(self.time_range_indicator);
        section.extend_from_slice(&0u16.to_be_bytes()); // Number in average
        section.push(0); // Number missing
        section.push(century as u8);
        section.push(0); // Sub-centre
        section.extend_from_slice(&sign_magnitude(self.decimal_scale as i64, 2));
        section
    }

    fn grid_description(&self) -> Vec<u8> {
        let g = &self.grid;
        let millis = |deg: f64| (deg * 1000.0).round() as i64;
        let increment = |deg: f64| {
            if g.increments_given {
                (deg * 1000.0).round() as u16
            } else {
                u16::MAX
            }
        };

        let mut section = Vec::with_capacity(32);
        push_u24(&mut section, 32);
        section.push(0); // NV
        section.push(255); // PV/PL
        section.push(0); // Lat/lon grid
        section.extend_from_slice(&(g.ni as u16).to_be_bytes());
        section.extend_from_slice(&(g.nj as u16).to_be_bytes());
        section.extend_from_slice(&sign_magnitude(millis(g.first_lat), 3));
        section.extend_from_slice(&sign_magnitude(millis(g.first_lon), 3));
        section.push(if g.increments_given { 0x80 } else { 0 });
        section.extend_from_slice(&sign_magnitude(millis(g.last_lat()), 3));
        section.extend_from_slice(&sign_magnitude(millis(g.last_lon()), 3));
        section.extend_from_slice(&increment(g.di).to_be_bytes());
        section.extend_from_slice(&increment(g.dj).to_be_bytes());
        section.push(g.scanning_mode);
        section.extend_from_slice(&[0; 4]);
        section
    }
}

fn bitmap_section(bits: &[u8], num_points: usize) -> Vec<u8> {
    let mut payload = bits.to_vec();
    if (6 + payload.len()) % 2 != 0 {
        payload.push(0);
    }
    let unused_bits = payload.len() * 8 - num_points;

    let mut section = Vec::with_capacity(6 + payload.len());
    push_u24(&mut section, 6 + payload.len());
    section.push(unused_bits as u8);
    section.extend_from_slice(&0u16.to_be_bytes());
    section.extend_from_slice(&payload);
    section
}

fn binary_data_section(packed: &Packed) -> Vec<u8> {
    let mut payload = packed.data.clone();
    let mut unused_bits = 0u8;
    if (11 + payload.len()) % 2 != 0 {
        payload.push(0);
        unused_bits = 8;
    }

    let mut section = Vec::with_capacity(11 + payload.len());
    push_u24(&mut section, 11 + payload.len());
    section.push(unused_bits);
    section.extend_from_slice(&sign_magnitude(packed.binary_scale_factor as i64, 2));
    section.extend_from_slice(&ibm_from_f64(packed.reference_value));
    section.push(packed.bits_per_value);
    section.extend_from_slice(&payload);
    section
}

/// Build a GRIB edition 2 message (templates 3.0, 4.0 and 5.0).
#[derive(Debug, Clone)]
pub struct Grib2Builder {
    discipline: u8,
    category: u8,
    number: u8,
    centre: u16,
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    forecast_hour: u32,
    decimal_scale: i16,
    grid: GridLayout,
    values: Vec<f64>,
}

impl Grib2Builder {
    /// New analysis message for `(discipline, category, number)`.
    pub fn new(discipline: u8, category: u8, number: u8) -> Self {
        let grid = GridLayout::new();
        let values = vec![0.0; grid.num_points()];
        Self {
            discipline,
            category,
            number,
            centre: 98,
            year: 2024,
            month: 1,
            day: 1,
            hour: 0,
            forecast_hour: 0,
            decimal_scale: 0,
            grid,
            values,
        }
    }

    pub fn with_reference_time(mut self, year: u16, month: u8, day: u8, hour: u8) -> Self {
        self.year = year;
        self.month = month;
        self.day = day;
        self.hour = hour;
        self
    }

    pub fn with_forecast_hour(mut self, hour: u32) -> Self {
        self.forecast_hour = hour;
        self
    }

    pub fn with_grid(mut self, first_lat: f64, first_lon: f64, ni: usize, nj: usize, step: f64) -> Self {
        self.grid.first_lat = first_lat;
        self.grid.first_lon = first_lon;
        self.grid.ni = ni;
        self.grid.nj = nj;
        self.grid.di = step;
        self.grid.dj = step;
        self.values = vec![0.0; ni * nj];
        self
    }

    pub fn with_decimal_scale(mut self, decimal_scale: i16) -> Self {
        self.decimal_scale = decimal_scale;
        self
    }

    pub fn with_values(mut self, values: Vec<f64>) -> Self {
        self.values = values;
        self
    }

    pub fn with_constant_value(mut self, value: f64) -> Self {
        self.values = vec![value; self.grid.num_points()];
        self
    }

    pub fn with_field(mut self, f: impl Fn(f64, f64) -> f64) -> Self {
        self.values = grid_points(&self.grid)
            .into_iter()
            .map(|(lat, lon)| f(lat, lon))
            .collect();
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let scaled = scaled_values(&self.values, self.decimal_scale);
        let packed = pack(&scaled, |min| min as f32 as f64);

        let sections = [
            self.identification(),
            self.grid_definition(),
            self.product_definition(),
            self.data_representation(&packed),
            bitmap_section2(&packed),
            data_section2(&packed),
        ];
        let total = 16 + sections.iter().map(Vec::len).sum::<usize>() + 4;

        let mut message = Vec::with_capacity(total);
        message.extend_from_slice(b"GRIB");
        message.extend_from_slice(&[0, 0]);
        message.push(self.discipline);
        message.push(2);
        message.extend_from_slice(&(total as u64).to_be_bytes());
        for section in &sections {
            message.extend_from_slice(section);
        }
        message.extend_from_slice(b"7777");
        message
    }

    fn identification(&self) -> Vec<u8> {
        let mut section = Vec::with_capacity(21);
        section.extend_from_slice(&21u32.to_be_bytes());
        section.push(1);
        section.extend_from_slice(&self.centre.to_be_bytes());
        section.extend_from_slice(&0u16.to_be_bytes()); // Sub-centre
        section.push(2); // Master table version
        section.push(0); // Local table version
        section.push(1); // Start of forecast
        section.extend_from_slice(&self.year.to_be_bytes());
        section.extend_from_slice(&[self.month, self.day, self.hour, 0, 0]);
        section.push(0); // Operational
        section.push(0); // Analysis
        section
    }

    fn grid_definition(&self) -> Vec<u8> {
        let g = &self.grid;
        let micros = |deg: f64| (deg * 1e6).round() as i64;

        let mut section = Vec::with_capacity(72);
        section.extend_from_slice(&72u32.to_be_bytes());
        section.push(3);
        section.push(0); // Source of grid definition
        section.extend_from_slice(&(g.num_points() as u32).to_be_bytes());
        section.push(0);
        section.push(0);
        section.extend_from_slice(&0u16.to_be_bytes()); // Template 3.0

        section.push(6); // Spherical earth, radius 6371229 m
        section.push(0);
        section.extend_from_slice(&0u32.to_be_bytes());
        section.push(0);
        section.extend_from_slice(&0u32.to_be_bytes());
        section.push(0);
        section.extend_from_slice(&0u32.to_be_bytes());
        section.extend_from_slice(&(g.ni as u32).to_be_bytes());
        section.extend_from_slice(&(g.nj as u32).to_be_bytes());
        section.extend_from_slice(&0u32.to_be_bytes()); // Basic angle
        section.extend_from_slice(&u32::MAX.to_be_bytes()); // Subdivisions
        section.extend_from_slice(&sign_magnitude(micros(g.first_lat), 4));
        section.extend_from_slice(&sign_magnitude(micros(g.first_lon), 4));
        section.push(if g.increments_given { 0x30 } else { 0 });
        section.extend_from_slice(&sign_magnitude(micros(g.last_lat()), 4));
        section.extend_from_slice(&sign_magnitude(micros(g.last_lon()), 4));
        section.extend_from_slice(&(micros(g.di) as u32).to_be_bytes());
        section.extend_from_slice(&(micros(g.dj) as u32).to_be_bytes());
        section.push(g.scanning_mode);
        section
    }

    fn product_definition(&self) -> Vec<u8> {
        let mut section = Vec::with_capacity(34);
        section.extend_from_slice(&34u32.to_be_bytes());
        section.push(4);
        section.extend_from_slice(&0u16.to_be_bytes()); // Coordinate values
        section.extend_from_slice(&0u16.to_be_bytes()); // Template 4.0
        section.push(self.category);
        section.push(self.number);
        section.push(0); // Analysis
        section.push(0);
        section.push(0);
        section.extend_from_slice(&0u16.to_be_bytes());
        section.push(0);
        section.push(1); // Hours
        section.extend_from_slice(&self.forecast_hour.to_be_bytes());
        section.push(1); // Surface
        section.push(0);
        section.extend_from_slice(&0u32.to_be_bytes());
        section.push(255);
        section.push(0);
        section.extend_from_slice(&0u32.to_be_bytes());
        section
    }

    fn data_representation(&self, packed: &Packed) -> Vec<u8> {
        let mut section = Vec::with_capacity(21);
        section.extend_from_slice(&21u32.to_be_bytes());
        section.push(5);
        let present = self.values.iter().filter(|v| !v.is_nan()).count() as u32;
        section.extend_from_slice(&present.to_be_bytes());
        section.extend_from_slice(&0u16.to_be_bytes()); // Template 5.0
        section.extend_from_slice(&(packed.reference_value as f32).to_be_bytes());
        section.extend_from_slice(&sign_magnitude(packed.binary_scale_factor as i64, 2));
        section.extend_from_slice(&sign_magnitude(self.decimal_scale as i64, 2));
        section.push(packed.bits_per_value);
        section.push(0); // Floating point
        section
    }
}

fn bitmap_section2(packed: &Packed) -> Vec<u8> {
    let bits = packed.bitmap.as_deref().unwrap_or(&[]);
    let mut section = Vec::with_capacity(6 + bits.len());
    section.extend_from_slice(&(6 + bits.len() as u32).to_be_bytes());
    section.push(6);
    section.push(if packed.bitmap.is_some() { 0 } else { 255 });
    section.extend_from_slice(bits);
    section
}

fn data_section2(packed: &Packed) -> Vec<u8> {
    let mut section = Vec::with_capacity(5 + packed.data.len());
    section.extend_from_slice(&(5 + packed.data.len() as u32).to_be_bytes());
    section.push(7);
    section.extend_from_slice(&packed.data);
    section
}

/// Grid point coordinates in storage order for a layout.
fn grid_points(g: &GridLayout) -> Vec<(f64, f64)> {
    let lat_sign = if g.scanning_mode & 0x40 != 0 { 1.0 } else { -1.0 };
    let lon_sign = if g.scanning_mode & 0x80 != 0 { -1.0 } else { 1.0 };
    let point = |i: usize, j: usize| {
        (
            g.first_lat + lat_sign * j as f64 * g.dj,
            g.first_lon + lon_sign * i as f64 * g.di,
        )
    };

    let mut points = Vec::with_capacity(g.num_points());
    if g.scanning_mode & 0x20 != 0 {
        for i in 0..g.ni {
            for j in 0..g.nj {
                points.push(point(i, j));
            }
        }
    } else {
        for j in 0..g.nj {
            for i in 0..g.ni {
                points.push(point(i, j));
            }
        }
    }
    points
}

// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Interleaved 8-bit raster used for frames, codec canvases and meta frames

use anyhow::{bail, Result};

/// Row-major image with `channels` interleaved 8-bit samples per pixel
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Raster {
    width: usize,
    height: usize,
    channels: usize,
    data: Vec<u8>,
}

impl Raster {
    /// Zero-filled raster
    pub fn new(width: usize, height: usize, channels: usize) -> Self {
        Self {
            width,
            height,
            channels,
            data: vec![0; width * height * channels],
        }
    }

    pub fn from_vec(width: usize, height: usize, channels: usize, data: Vec<u8>) -> Result<Self> {
        if !(1..=4).contains(&channels) {
            bail!("unsupported channel count: {}", channels);
        }
        let Some(expected) = width
            .checked_mul(height)
            .and_then(|pixels| pixels.checked_mul(channels))
        else {
            bail!("raster {}x{}x{} is too large", width, height, channels);
        };
        if data.len() != expected {
            bail!(
                "raster {}x{}x{} needs {} bytes, got {}",
                width,
                height,
                channels,
                expected,
                data.len()
            );
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn index(&self, x: usize, y: usize) -> Option<usize> {
        if x < self.width && y < self.height {
            Some((y * self.width + x) * self.channels)
        } else {
            None
        }
    }

    /// Sample of channel `c` at (x, y)
    pub fn get(&self, x: usize, y: usize, c: usize) -> Option<u8> {
        if c >= self.channels {
            return None;
        }
        self.index(x, y).map(|i| self.data[i + c])
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<&[u8]> {
        self.index(x, y).map(|i| &self.data[i..i + self.channels])
    }

    /// Set every channel of (x, y) to `value`. Returns false when out of bounds.
    pub fn set_pixel(&mut self, x: usize, y: usize, value: u8) -> bool {
        match self.index(x, y) {
            Some(i) => {
                self.data[i..i + self.channels].fill(value);
                true
            }
            None => false,
        }
    }

    /// Fill the `size`x`size` square at (x, y), clipped to the raster
    pub fn fill_block(&mut self, x: usize, y: usize, size: usize, value: u8) {
        let x_end = (x + size).min(self.width);
        let y_end = (y + size).min(self.height);
        for row in y.min(y_end)..y_end {
            let start = (row * self.width + x) * self.channels;
            let end = (row * self.width + x_end) * self.channels;
            if start < end {
                self.data[start..end].fill(value);
            }
        }
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    /// Nearest-neighbour resample
    pub fn resize(&self, width: usize, height: usize) -> Raster {
        if (width, height) == self.dimensions() {
            return self.clone();
        }
        let mut out = Raster::new(width, height, self.channels);
        if self.width == 0 || self.height == 0 {
            return out;
        }
        for y in 0..height {
            let sy = y * self.height / height;
            for x in 0..width {
                let sx = x * self.width / width;
                let src = (sy * self.width + sx) * self.channels;
                let dst = (y * width + x) * self.channels;
                out.data[dst..dst + self.channels]
                    .copy_from_slice(&self.data[src..src + self.channels]);
            }
        }
        out
    }

    /// Resample both dimensions by `factor`
    pub fn scale(&self, factor: f64) -> Raster {
        if (factor - 1.0).abs() < f64::EPSILON {
            return self.clone();
        }
        let width = ((self.width as f64 * factor) as usize).max(1);
        let height = ((self.height as f64 * factor) as usize).max(1);
        self.resize(width, height)
    }

    /// Convert to `channels` samples per pixel
    ///
    /// Going to one channel averages the first three; otherwise missing
    /// channels repeat the last available one.
    pub fn to_channels(&self, channels: usize) -> Raster {
        if channels == self.channels || self.channels == 0 {
            return self.clone();
        }
        let mut out = Raster::new(self.width, self.height, channels);
        for (src, dst) in self
            .data
            .chunks_exact(self.channels)
            .zip(out.data.chunks_exact_mut(channels))
        {
            if channels == 1 && self.channels >= 3 {
                dst[0] = ((src[0] as u16 + src[1] as u16 + src[2] as u16) / 3) as u8;
            } else {
                for (c, sample) in dst.iter_mut().enumerate() {
                    *sample = src[c.min(self.channels - 1)];
                }
            }
        }
        out
    }

    /// New raster with `other` appended below this one
    pub fn stack_below(&self, other: &Raster) -> Result<Raster> {
        if other.width != self.width {
            bail!(
                "cannot stack raster of width {} below width {}",
                other.width,
                self.width
            );
        }
        let other = other.to_channels(self.channels);
        let mut data = Vec::with_capacity(self.data.len() + other.data.len());
        data.extend_from_slice(&self.data);
        data.extend_from_slice(&other.data);
        Ok(Raster {
            width: self.width,
            height: self.height + other.height,
            channels: self.channels,
            data,
        })
    }

    /// Rows `start..end`, clamped to the raster height
    pub fn crop_rows(&self, start: usize, end: usize) -> Raster {
        let end = end.min(self.height);
        let start = start.min(end);
        let row_len = self.width * self.channels;
        Raster {
            width: self.width,
            height: end - start,
            channels: self.channels,
            data: self.data[start * row_len..end * row_len].to_vec(),
        }
    }
}

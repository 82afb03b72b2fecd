//! Square tiles covering the image.
//!
//! Tiles are always full squares; the ones on the right and bottom edges
//! hang over the image and their outside pixels are simply never copied.

/// A square region of the image rendered as one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    /// X coordinate of the top-left corner
    pub x: u32,
    /// Y coordinate of the top-left corner
    pub y: u32,
    /// Edge length in pixels
    pub size: u32,
    /// Position in render order
    pub index: usize,
}

impl Tile {
    pub fn new(x: u32, y: u32, size: u32, index: usize) -> Self {
        Self { x, y, size, index }
    }

    /// True if `(x, y)` lies inside the tile's `size` x `size` square.
    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.x as i64 && y >= self.y as i64 && x < self.x as i64 + self.size as i64 && y < self.y as i64 + self.size as i64
    }

    /// Pixels of this tile that fall inside a `width` x `height` image.
    pub fn visible_pixels(&self, width: u32, height: u32) -> u32 {
        let w = (self.x + self.size).min(width).saturating_sub(self.x);
        let h = (self.y + self.size).min(height).saturating_sub(self.y);
        w * h
    }

    /// RNG seed for this tile, independent of the order tiles run in.
    pub fn seed(&self, base: u64) -> u64 {
        let pos = ((self.x as u64) << 32) | self.y as u64;
        // SplitMix64 finaliser
        let mut z = base ^ pos.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }
}

/// Largest power of two not above `count` (but at least 4), divided by 4.
///
/// For a 576 pixel wide image this gives 16-pixel tiles from `576 / 8`.
pub(crate) fn tile_size_for(count: u32) -> u32 {
    let mut size = 1024;
    while size > count && size > 4 {
        size /= 2;
    }
    size / 4
}

/// Cover a `width` x `height` image with tiles, centre first.
pub fn generate_tiles(width: u32, height: u32, tile_size: u32) -> Vec<Tile> {
    let tile_size = tile_size.max(1);
    let mut tiles = Vec::new();

    let mut y = 0;
    while y < height {
        let mut x = 0;
        while x < width {
            tiles.push(Tile::new(x, y, tile_size, tiles.len()));
            x += tile_size;
        }
        y += tile_size;
    }

    sort_spiral(&mut tiles, width, height);
    for (i, tile) in tiles.iter_mut().enumerate() {
        tile.index = i;
    }
    tiles
}

/// Sort tiles by distance of their visible centre from the image centre.
fn sort_spiral(tiles: &mut [Tile], width: u32, height: u32) {
    let center_x = width as f32 / 2.0;
    let center_y = height as f32 / 2.0;

    let dist = |t: &Tile| {
        let cx = (t.x as f32 + (t.x + t.size).min(width) as f32) / 2.0;
        let cy = (t.y as f32 + (t.y + t.size).min(height) as f32) / 2.0;
        (cx - center_x).powi(2) + (cy - center_y).powi(2)
    };

    tiles.sort_by(|a, b| dist(a).partial_cmp(&dist(b)).unwrap_or(std::cmp::Ordering::Equal));
}

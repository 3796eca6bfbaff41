//! Row-addressable output buffers: either one contiguous allocation or a
//! caller-supplied vector of row pointers, unified behind one type so the
//! remap loops don't need to know which.

use std::mem::MaybeUninit;

pub(crate) enum RowBitmapMut<'a, T> {
    Contiguous { buf: &'a mut [T], width: usize },
    Rows { rows: Vec<&'a mut [T]>, width: usize },
}

impl<'a, T> RowBitmapMut<'a, T> {
    pub fn new_contiguous(buf: &'a mut [T], width: usize) -> Self {
        Self::Contiguous { buf, width }
    }

    pub fn new_rows(rows: Vec<&'a mut [T]>, width: usize) -> Self {
        Self::Rows { rows, width }
    }

    #[must_use]
    pub fn width(&self) -> usize {
        match self {
            Self::Contiguous { width, .. } | Self::Rows { width, .. } => *width,
        }
    }

    /// Per-row mutable slices, materialized once per call. Cheap relative
    /// to the per-pixel work done while iterating them.
    pub fn rows_mut(&mut self) -> std::vec::IntoIter<&mut [T]> {
        match self {
            Self::Contiguous { buf, width } => buf.chunks_exact_mut(*width).collect::<Vec<_>>().into_iter(),
            Self::Rows { rows, width } => rows.iter_mut().map(|r| &mut r[..*width]).collect::<Vec<_>>().into_iter(),
        }
    }
}

impl<'a> RowBitmapMut<'a, MaybeUninit<u8>> {
    /// Caller guarantees every element has been written.
    pub unsafe fn assume_init(self) -> RowBitmap<'a, u8> {
        match self {
            Self::Contiguous { buf, width } => {
                let ptr = buf.as_mut_ptr().cast::<u8>();
                let len = buf.len();
                RowBitmap::Contiguous { buf: std::slice::from_raw_parts_mut(ptr, len), width }
            }
            Self::Rows { rows, width } => {
                let rows = rows
                    .into_iter()
                    .map(|r| {
                        let ptr = r.as_mut_ptr().cast::<u8>();
                        let len = r.len();
                        std::slice::from_raw_parts_mut(ptr, len)
                    })
                    .collect();
                RowBitmap::Rows { rows, width }
            }
        }
    }
}

pub(crate) enum RowBitmap<'a, T> {
    Contiguous { buf: &'a mut [T], width: usize },
    Rows { rows: Vec<&'a mut [T]>, width: usize },
}

impl<'a, T> RowBitmap<'a, T> {
    #[must_use]
    pub fn row(&self, i: usize) -> &[T] {
        match self {
            Self::Contiguous { buf, width } => &buf[i * width..i * width + width],
            Self::Rows { rows, width } => &rows[i][..*width],
        }
    }

    #[must_use]
    pub fn width(&self) -> usize {
        match self {
            Self::Contiguous { width, .. } | Self::Rows { width, .. } => *width,
        }
    }

    #[must_use]
    pub fn height(&self) -> usize {
        match self {
            Self::Contiguous { buf, width } => buf.len() / *width,
            Self::Rows { rows, .. } => rows.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contiguous_rows_mut_yields_expected_chunks() {
        let mut data = vec![0u8; 12];
        let mut rb = RowBitmapMut::new_contiguous(&mut data, 4);
        assert_eq!(rb.rows_mut().count(), 3);
    }
}

//! Conversions between coordinate representations.
//!
//! The engine exchanges coordinates as one interleaved buffer holding the tuple of every cell in
//! turn: all dimensions of cell 0, then all dimensions of cell 1, and so on. Callers holding one
//! column per dimension translate with [`zip`] and [`split`] at the boundary.

use itertools::Itertools;
use tessera_error::{TesseraResult, tessera_bail};

/// Interleave fixed-size coordinate tuples into a single buffer.
pub fn pack<T: Copy, const N: usize>(tuples: &[[T; N]]) -> Vec<T> {
    tuples.iter().flatten().copied().collect()
}

/// Break an interleaved buffer back into one tuple per cell.
pub fn unpack<T: Copy>(buffer: &[T], ndim: usize) -> TesseraResult<Vec<Vec<T>>> {
    check_arity(buffer.len(), ndim)?;
    Ok(buffer.chunks_exact(ndim).map(<[T]>::to_vec).collect())
}

/// Transpose an interleaved buffer into one column per dimension.
pub fn split<T: Copy>(buffer: &[T], ndim: usize) -> TesseraResult<Vec<Vec<T>>> {
    check_arity(buffer.len(), ndim)?;
    Ok((0..ndim)
        .map(|d| buffer.iter().skip(d).step_by(ndim).copied().collect())
        .collect())
}

/// Interleave one column per dimension into a single buffer.
pub fn zip<T: Copy, C: AsRef<[T]>>(columns: &[C]) -> TesseraResult<Vec<T>> {
    let Some(first) = columns.first() else {
        tessera_bail!(MalformedQuery: "cannot zip zero coordinate columns");
    };
    let ncells = first.as_ref().len();
    if let Some((d, col)) = columns
        .iter()
        .find_position(|c| c.as_ref().len() != ncells)
    {
        tessera_bail!(
            MalformedQuery: "coordinate column {} holds {} values, expected {}",
            d,
            col.as_ref().len(),
            ncells
        );
    }
    Ok((0..ncells)
        .flat_map(|cell| columns.iter().map(move |c| c.as_ref()[cell]))
        .collect())
}

/// Interleave little-endian byte columns of `width`-byte scalars.
pub(crate) fn zip_le<C: AsRef<[u8]>>(columns: &[C], width: usize) -> TesseraResult<Vec<u8>> {
    let chunked = columns
        .iter()
        .map(|c| c.as_ref().chunks_exact(width).collect::<Vec<_>>())
        .collect::<Vec<_>>();
    Ok(zip(&chunked)?.concat())
}

fn check_arity(len: usize, ndim: usize) -> TesseraResult<()> {
    if ndim == 0 {
        tessera_bail!(MalformedQuery: "coordinate tuples need at least one dimension");
    }
    if len % ndim != 0 {
        tessera_bail!(
            MalformedQuery: "coordinate buffer of {} values is not a multiple of {} dimensions",
            len,
            ndim
        );
    }
    Ok(())
}

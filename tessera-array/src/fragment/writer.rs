use itertools::Itertools;
use tessera_dtype::PValue;
use tessera_error::{TesseraExpect, TesseraResult, tessera_bail, tessera_err};
use tessera_schema::ArraySchema;

use super::{
    EOF_SIZE, FRAGMENT_VERSION, FRAGMENTS_DIR, Fragment, FragmentFooter, MAGIC_BYTES,
    MAX_POSTSCRIPT_SIZE, Mbr, Postscript, Segment, TileMetadata, fragment_name, list_fragments,
};
use crate::cells::CellBatch;
use crate::context::CancelToken;
use crate::vfs::join;
use crate::Context;

/// Serialize `cells`, already in global order, into a complete fragment file.
pub(crate) fn encode_fragment(
    schema: &ArraySchema,
    cells: &CellBatch,
    cancel: &CancelToken,
) -> TesseraResult<(Vec<u8>, FragmentFooter)> {
    let capacity = usize::try_from(schema.capacity()).unwrap_or(usize::MAX);
    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC_BYTES);

    let mut tiles = Vec::with_capacity(cells.len().div_ceil(capacity));
    let mut fragment_mbr: Option<Mbr> = None;
    for chunk in &(0..cells.len()).chunks(capacity) {
        cancel.check()?;
        let indices = chunk.collect::<Vec<_>>();
        let mbr = tile_mbr(schema, cells, &indices)?;
        fragment_mbr = Some(match fragment_mbr {
            None => mbr.clone(),
            Some(acc) => acc.union(&mbr),
        });

        let coords = write_segment(&mut out, |out| {
            for &idx in &indices {
                out.extend_from_slice(cells.coord(schema, idx));
            }
        })?;
        let attributes = (0..schema.attributes().len())
            .map(|attr| {
                write_segment(&mut out, |out| {
                    for &idx in &indices {
                        out.extend_from_slice(cells.value(schema, attr, idx));
                    }
                })
            })
            .try_collect::<_, Vec<_>, _>()?;
        tiles.push(TileMetadata {
            cell_count: indices.len() as u64,
            mbr,
            coords,
            attributes,
        });
    }

    let Some(mbr) = fragment_mbr else {
        tessera_bail!(InvalidState: "refusing to encode an empty fragment");
    };
    let footer = FragmentFooter {
        cell_count: cells.len() as u64,
        mbr,
        tiles,
    };
    let footer_segment = write_segment(&mut out, |out| {
        serde_json::to_writer(out, &footer).tessera_expect("fragment footer is serializable");
    })?;

    // The postscript is written without framing, its length lives in the EOF record.
    let postscript = serde_json::to_vec(&Postscript {
        footer: footer_segment,
    })?;
    if postscript.len() > MAX_POSTSCRIPT_SIZE as usize {
        tessera_bail!(
            "postscript is too large ({} bytes); max postscript size is {}",
            postscript.len(),
            MAX_POSTSCRIPT_SIZE
        );
    }
    let postscript_len = u16::try_from(postscript.len())
        .tessera_expect("postscript already verified to fit into u16");
    out.extend_from_slice(&postscript);

    let mut eof = [0u8; EOF_SIZE];
    eof[0..2].copy_from_slice(&FRAGMENT_VERSION.to_le_bytes());
    eof[2..4].copy_from_slice(&postscript_len.to_le_bytes());
    eof[4..8].copy_from_slice(&MAGIC_BYTES);
    out.extend_from_slice(&eof);

    Ok((out, footer))
}

fn write_segment(out: &mut Vec<u8>, write: impl FnOnce(&mut Vec<u8>)) -> TesseraResult<Segment> {
    let offset = out.len();
    write(out);
    Ok(Segment {
        offset: offset as u64,
        length: u32::try_from(out.len() - offset)
            .map_err(|_| tessera_err!("segment length exceeds maximum u32"))?,
    })
}

fn tile_mbr(schema: &ArraySchema, cells: &CellBatch, indices: &[usize]) -> TesseraResult<Mbr> {
    let mut mbr: Option<Mbr> = None;
    for &idx in indices {
        let tuple = decode_tuple(schema, cells.coord(schema, idx))?;
        match mbr.as_mut() {
            None => mbr = Some(Mbr::point(tuple)),
            Some(mbr) => mbr.expand(&tuple),
        }
    }
    mbr.ok_or_else(|| tessera_err!(InvalidState: "a tile needs at least one cell"))
}

/// Decode a little-endian coordinate tuple into one value per dimension.
pub(crate) fn decode_tuple(schema: &ArraySchema, tuple: &[u8]) -> TesseraResult<Vec<PValue>> {
    let ptype = schema.domain().ptype();
    tuple
        .chunks_exact(ptype.byte_width())
        .map(|coord| PValue::from_le_bytes(ptype, coord))
        .collect()
}

/// Encode `cells` as a new fragment of the array at `array_uri` and commit it atomically.
///
/// The file is written under a hidden temporary name and renamed into place, so readers either
/// see the whole fragment or nothing. The fragment is stamped later than every fragment already
/// committed to the array.
pub(crate) fn commit_fragment(
    ctx: &Context,
    array_uri: &str,
    schema: &ArraySchema,
    cells: &CellBatch,
    cancel: &CancelToken,
) -> TesseraResult<Fragment> {
    let (bytes, footer) = encode_fragment(schema, cells, cancel)?;
    cancel.check()?;

    // Other contexts keep their own clocks, so order after everything already committed.
    let newest = list_fragments(ctx.vfs().as_ref(), array_uri)?
        .last()
        .map_or(0, |(_, timestamp)| *timestamp);
    let timestamp = ctx.next_timestamp(newest);
    let name = fragment_name(timestamp);
    let dir = join(array_uri, FRAGMENTS_DIR);
    let tmp = join(&dir, &format!(".{}.tmp", name));
    let uri = join(&dir, &name);

    ctx.vfs().write(&tmp, &bytes)?;
    if let Err(err) = ctx.vfs().rename(&tmp, &uri) {
        if let Err(cleanup) = ctx.vfs().remove_file(&tmp) {
            log::warn!("failed to remove temporary fragment {}: {}", tmp, cleanup);
        }
        return Err(err.into());
    }
    log::debug!(
        "committed fragment {} with {} cells in {} tiles ({} bytes)",
        uri,
        footer.cell_count,
        footer.tiles.len(),
        bytes.len()
    );
    Ok(Fragment::new(name, uri, timestamp, footer))
}

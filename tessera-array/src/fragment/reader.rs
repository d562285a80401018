use itertools::Itertools;
use tessera_error::{TesseraResult, tessera_bail, tessera_err};
use tessera_schema::ArraySchema;

use super::{
    EOF_SIZE, FRAGMENT_VERSION, FRAGMENTS_DIR, Fragment, FragmentFooter, MAGIC_BYTES,
    MAX_POSTSCRIPT_SIZE, Postscript, Segment, TileMetadata, parse_fragment_name,
};
use crate::cells::CellBatch;
use crate::vfs::{Vfs, join};

/// The committed fragments of an array as `(name, timestamp)`, oldest first.
///
/// Temporary files left behind by interrupted commits are skipped.
pub(crate) fn list_fragments(
    vfs: &dyn Vfs,
    array_uri: &str,
) -> TesseraResult<Vec<(String, u64)>> {
    let dir = join(array_uri, FRAGMENTS_DIR);
    let mut fragments = Vec::new();
    for name in vfs.ls(&dir)? {
        match parse_fragment_name(&name) {
            Some(timestamp) => fragments.push((name, timestamp)),
            None if name.ends_with(".tmp") => {
                log::warn!("ignoring uncommitted fragment {}", join(&dir, &name));
            }
            None => log::warn!("ignoring foreign file {}", join(&dir, &name)),
        }
    }
    fragments.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    Ok(fragments)
}

/// Read the footer of a committed fragment. Only the tail of the file is fetched.
pub(crate) fn open_fragment(
    vfs: &dyn Vfs,
    schema: &ArraySchema,
    array_uri: &str,
    name: &str,
    timestamp: u64,
) -> TesseraResult<Fragment> {
    let uri = join(&join(array_uri, FRAGMENTS_DIR), name);
    let footer = read_footer(vfs, &uri)
        .and_then(|footer| validate_footer(schema, footer))
        .map_err(|e| e.with_context(format!("opening fragment {}", uri)))?;
    log::trace!(
        "opened fragment {} with {} cells in {} tiles",
        uri,
        footer.cell_count,
        footer.tiles.len()
    );
    Ok(Fragment::new(name.to_string(), uri, timestamp, footer))
}

fn read_footer(vfs: &dyn Vfs, uri: &str) -> TesseraResult<FragmentFooter> {
    let file_size = vfs.file_size(uri)?;
    if file_size < (MAGIC_BYTES.len() + EOF_SIZE) as u64 {
        tessera_bail!(Corrupted: "file of {} bytes is too short to be a fragment", file_size);
    }

    // The initial read always covers the largest possible postscript.
    let initial_read_size = (u64::from(MAX_POSTSCRIPT_SIZE) + EOF_SIZE as u64).min(file_size);
    let initial_offset = file_size - initial_read_size;
    let initial_read = vfs.read_range(uri, initial_offset..file_size)?;
    let postscript = parse_postscript(&initial_read)?;

    let footer = postscript.footer;
    if footer.byte_range().end > file_size {
        tessera_bail!(Corrupted: "footer segment ends past the end of the file");
    }
    let bytes = if footer.offset >= initial_offset {
        let start = usize::try_from(footer.offset - initial_offset)?;
        initial_read.slice(start..start + footer.length as usize)
    } else {
        vfs.read_range(uri, footer.byte_range())?
    };
    serde_json::from_slice(&bytes).map_err(|e| tessera_err!(Corrupted: "invalid footer: {}", e))
}

fn parse_postscript(initial_read: &[u8]) -> TesseraResult<Postscript> {
    let eof_loc = initial_read.len() - EOF_SIZE;
    let magic_bytes_loc = eof_loc + (EOF_SIZE - MAGIC_BYTES.len());

    if initial_read[magic_bytes_loc..] != MAGIC_BYTES {
        tessera_bail!(Corrupted: "malformed fragment, invalid magic bytes");
    }

    let version = u16::from_le_bytes([initial_read[eof_loc], initial_read[eof_loc + 1]]);
    if version != FRAGMENT_VERSION {
        tessera_bail!(Corrupted: "malformed fragment, unsupported version {}", version);
    }

    let ps_size =
        u16::from_le_bytes([initial_read[eof_loc + 2], initial_read[eof_loc + 3]]) as usize;
    if ps_size > eof_loc {
        tessera_bail!(Corrupted: "postscript of {} bytes does not fit the file", ps_size);
    }
    serde_json::from_slice(&initial_read[eof_loc - ps_size..eof_loc])
        .map_err(|e| tessera_err!(Corrupted: "invalid postscript: {}", e))
}

fn validate_footer(schema: &ArraySchema, footer: FragmentFooter) -> TesseraResult<FragmentFooter> {
    let ndim = schema.domain().ndim();
    let tuple_width = schema.domain().tuple_width() as u64;
    if footer.mbr.ranges().len() != ndim {
        tessera_bail!(
            Corrupted: "fragment bounds have {} dimensions, expected {}",
            footer.mbr.ranges().len(),
            ndim
        );
    }
    let total: u64 = footer.tiles.iter().map(TileMetadata::cell_count).sum();
    if total != footer.cell_count {
        tessera_bail!(
            Corrupted: "tiles hold {} cells but the fragment claims {}",
            total,
            footer.cell_count
        );
    }
    for (idx, tile) in footer.tiles.iter().enumerate() {
        if tile.attributes.len() != schema.attributes().len() || tile.mbr.ranges().len() != ndim {
            tessera_bail!(Corrupted: "tile {} does not match the array schema", idx);
        }
        let mut expected = std::iter::once((&tile.coords, tuple_width)).chain(
            tile.attributes
                .iter()
                .zip(schema.attributes())
                .map(|(segment, attr)| (segment, attr.ptype().byte_width() as u64)),
        );
        if let Some((segment, _)) = expected
            .find(|(segment, width)| u64::from(segment.length) != tile.cell_count * width)
        {
            tessera_bail!(
                Corrupted: "tile {} segment at offset {} has {} bytes for {} cells",
                idx,
                segment.offset,
                segment.length,
                tile.cell_count
            );
        }
    }
    Ok(footer)
}

/// Read every cell of one tile of a fragment.
///
/// Every segment must hold exactly one value of its field per cell of the tile under `schema`.
pub(crate) fn read_tile(
    vfs: &dyn Vfs,
    schema: &ArraySchema,
    fragment: &Fragment,
    tile: &TileMetadata,
) -> TesseraResult<CellBatch> {
    let cell_count = usize::try_from(tile.cell_count)?;
    if tile.attributes.len() != schema.attributes().len() {
        tessera_bail!(
            Corrupted: "tile of fragment {} holds {} attributes, expected {}",
            fragment.name(),
            tile.attributes.len(),
            schema.attributes().len()
        );
    }
    let read = |segment: &Segment, width: usize| -> TesseraResult<Vec<u8>> {
        let bytes = vfs.read_range(fragment.uri(), segment.byte_range())?;
        if bytes.len() != cell_count * width {
            tessera_bail!(
                Corrupted: "segment at {} of fragment {} has {} bytes for {} cells of {} bytes",
                segment.offset,
                fragment.name(),
                bytes.len(),
                cell_count,
                width
            );
        }
        Ok(bytes.to_vec())
    };
    let coords = read(&tile.coords, schema.domain().tuple_width())?;
    let attributes = tile
        .attributes
        .iter()
        .zip(schema.attributes())
        .map(|(segment, attr)| read(segment, attr.ptype().byte_width()))
        .try_collect::<_, Vec<_>, _>()?;
    Ok(CellBatch::new(coords, attributes, cell_count))
}

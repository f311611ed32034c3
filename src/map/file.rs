//! Directed maps read from a pairing file.
//!
//! Each non-blank line holds six integers `x1 y1 z1 x2 y2 z2`. The z columns
//! are ignored: the `(x1, y1)` column streams to the `(x2, y2)` column on
//! every z plane, using process 0 of each node. Plane 0 carries the trace
//! roles.

use super::{DirectedMap, TraceRole};
use crate::error::{Error, Result};
use crate::topology::{Coordinate, Topology};
use std::path::Path;

/// One line of a pairing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowPair {
    /// Sending column `(x, y)`
    pub from: (usize, usize),
    /// Receiving column `(x, y)`
    pub to: (usize, usize),
}

/// Parse the text of a pairing file.
pub fn parse(text: &str) -> Result<Vec<RowPair>> {
    let mut rows = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        if line.trim().is_empty() {
            continue;
        }
        let fields = line
            .split_whitespace()
            .map(|field| {
                field.parse::<usize>().map_err(|_| Error::MapFile {
                    line: line_no,
                    reason: format!("`{field}` is not a coordinate"),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        if fields.len() != 6 {
            return Err(Error::MapFile {
                line: line_no,
                reason: format!("expected 6 fields, found {}", fields.len()),
            });
        }
        rows.push(RowPair {
            from: (fields[0], fields[1]),
            to: (fields[3], fields[4]),
        });
    }
    Ok(rows)
}

/// Read and parse a pairing file.
pub fn load(path: &Path) -> Result<Vec<RowPair>> {
    let text = std::fs::read_to_string(path).map_err(|source| Error::InputIo {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&text)
}

/// Expand parsed rows along z into a directed map.
pub fn directed_map<T: Topology + ?Sized>(topology: &T, rows: &[RowPair]) -> Result<DirectedMap> {
    let dims = topology.dimensions();
    let in_range = |(x, y): (usize, usize)| x < dims.x && y < dims.y;
    let mut map = DirectedMap::inactive(topology.num_ranks());
    for row in rows {
        if !in_range(row.from) || !in_range(row.to) {
            return Err(Error::TopologyMismatch(format!(
                "pairing {:?} -> {:?} lies outside the {}x{} x-y face",
                row.from, row.to, dims.x, dims.y
            )));
        }
        for z in 0..dims.z {
            let sender = topology.coord_to_rank(Coordinate::new(row.from.0, row.from.1, z, 0));
            let receiver = topology.coord_to_rank(Coordinate::new(row.to.0, row.to.1, z, 0));
            map.send.set(sender, Some(receiver));
            map.recv.set(receiver, Some(sender));
            if z == 0 {
                map.trace[sender] = TraceRole::Sender;
                map.trace[receiver] = TraceRole::Receiver;
            }
        }
    }
    log::debug!("receive map:\n{}", map.recv.dump());
    log::debug!("send map:\n{}", map.send.dump());
    map.check_consistency()?;
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{Dimensions, TorusTopology};
    use std::io::Write;

    #[test]
    fn parse_skips_blank_lines() {
        let rows = parse("0 0 0 1 0 0\n\n  \n1 1 0 0 1 0\n").unwrap();
        assert_eq!(
            rows,
            vec![
                RowPair { from: (0, 0), to: (1, 0) },
                RowPair { from: (1, 1), to: (0, 1) },
            ]
        );
    }

    #[test]
    fn parse_reports_line_numbers() {
        match parse("0 0 0 1 0 0\n0 0 x 1 0 0\n") {
            Err(Error::MapFile { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {other:?}"),
        }
        match parse("\n0 0 0 1 0\n") {
            Err(Error::MapFile { line, reason }) => {
                assert_eq!(line, 2);
                assert!(reason.contains("found 5"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rows_expand_along_z() {
        let torus = TorusTopology::new(Dimensions::new(2, 2, 3, 2));
        let rows = [RowPair { from: (0, 0), to: (1, 1) }];
        let map = directed_map(&torus, &rows).unwrap();
        // (1,1,z,0) = 3 + 4z
        for z in 0..3 {
            assert_eq!(map.send.partner(4 * z), Some(3 + 4 * z));
            assert_eq!(map.recv.partner(3 + 4 * z), Some(4 * z));
        }
        assert_eq!(map.trace[0], TraceRole::Sender);
        assert_eq!(map.trace[3], TraceRole::Receiver);
        assert_eq!(map.trace[4], TraceRole::None);
        assert_eq!(map.active_ranks(), vec![0, 3, 4, 7, 8, 11]);
    }

    #[test]
    fn out_of_range_row_is_a_topology_mismatch() {
        let torus = TorusTopology::new(Dimensions::new(2, 2, 2, 1));
        let rows = [RowPair { from: (0, 0), to: (2, 0) }];
        assert!(matches!(
            directed_map(&torus, &rows),
            Err(Error::TopologyMismatch(_))
        ));
    }

    #[test]
    fn conflicting_rows_fail_consistency() {
        let torus = TorusTopology::new(Dimensions::new(3, 1, 1, 1));
        let rows = [
            RowPair { from: (0, 0), to: (1, 0) },
            RowPair { from: (0, 0), to: (2, 0) },
        ];
        assert!(matches!(
            directed_map(&torus, &rows),
            Err(Error::MapConsistency { .. })
        ));
    }

    #[test]
    fn load_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0 0 0 1 0 0").unwrap();
        assert_eq!(load(file.path()).unwrap().len(), 1);

        let missing = file.path().with_extension("absent");
        assert!(matches!(load(&missing), Err(Error::InputIo { .. })));
    }
}

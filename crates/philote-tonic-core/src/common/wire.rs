//! Conversions between the protobuf messages and the metadata/array model,
//! plus the chunk encoder and scatter-writer used on both ends of a stream.

use crate::{
    Error, Result,
    array::{ArrayMap, Jacobian},
    chunk::{ChunkCursor, chunk_ranges, scatter},
    meta::{PartialMeta, Role, VariableMeta},
    proto::{self, VariableRole},
};

impl From<Role> for VariableRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Input => VariableRole::Input,
            Role::Output => VariableRole::Output,
            Role::Residual => VariableRole::Residual,
        }
    }
}

/// Role tag carried by an inbound chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkRole {
    Variable(Role),
    Partial,
}

impl TryFrom<i32> for ChunkRole {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self> {
        match VariableRole::try_from(value) {
            Ok(VariableRole::Input) => Ok(Self::Variable(Role::Input)),
            Ok(VariableRole::Output) => Ok(Self::Variable(Role::Output)),
            Ok(VariableRole::Residual) => Ok(Self::Variable(Role::Residual)),
            Ok(VariableRole::Partial) => Ok(Self::Partial),
            Err(_) => Err(Error::InvalidRole { value }),
        }
    }
}

impl core::fmt::Display for ChunkRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Variable(role) => write!(f, "{role}"),
            Self::Partial => f.write_str("partial"),
        }
    }
}

impl From<&VariableMeta> for proto::VariableMetaData {
    fn from(v: &VariableMeta) -> Self {
        Self {
            name: v.name.clone(),
            role: VariableRole::from(v.role) as i32,
            shape: v.shape.iter().map(|&d| d as u64).collect(),
            units: v.units.clone(),
        }
    }
}

impl TryFrom<proto::VariableMetaData> for VariableMeta {
    type Error = Error;

    fn try_from(msg: proto::VariableMetaData) -> Result<Self> {
        let role = match ChunkRole::try_from(msg.role)? {
            ChunkRole::Variable(role) => role,
            ChunkRole::Partial => {
                return Err(Error::UnexpectedRole {
                    name: msg.name,
                    role: ChunkRole::Partial.to_string(),
                });
            }
        };
        let shape = msg
            .shape
            .iter()
            .map(|&d| usize::try_from(d).ok().filter(|&d| d > 0))
            .collect::<Option<Vec<_>>>()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::InvalidShape {
                name: msg.name.clone(),
                shape: msg.shape.iter().map(|&d| d as usize).collect(),
            })?;
        Ok(Self {
            name: msg.name,
            role,
            shape,
            units: msg.units,
        })
    }
}

impl From<&PartialMeta> for proto::PartialsMetaData {
    fn from(p: &PartialMeta) -> Self {
        Self {
            name: p.of.clone(),
            subname: p.wrt.clone(),
        }
    }
}

impl From<proto::PartialsMetaData> for PartialMeta {
    fn from(msg: proto::PartialsMetaData) -> Self {
        Self {
            of: msg.name,
            wrt: msg.subname,
        }
    }
}

/// Splits `values` into chunks of at most `max_chunk` elements tagged with
/// `name`, `subname` and `role`. An empty array produces no chunks.
pub fn encode(
    name: &str,
    subname: &str,
    role: VariableRole,
    values: &[f64],
    max_chunk: usize,
) -> impl Iterator<Item = proto::ArrayChunk> {
    chunk_ranges(values.len(), max_chunk).map(move |r| proto::ArrayChunk {
        name: name.to_string(),
        subname: subname.to_string(),
        role: role as i32,
        start: r.start as u64,
        end: r.end as u64,
        data: values[r].to_vec(),
    })
}

/// Chunks every array of `arrays` under `role`, in map order.
pub fn encode_map(arrays: &ArrayMap, role: Role, max_chunk: usize) -> Vec<proto::ArrayChunk> {
    arrays
        .iter()
        .flat_map(|(name, array)| {
            encode(name, "", role.into(), array.as_slice(), max_chunk)
        })
        .collect()
}

/// Chunks every Jacobian block as a partial, in insertion order.
pub fn encode_jacobian(jac: &Jacobian, max_chunk: usize) -> Vec<proto::ArrayChunk> {
    jac.iter()
        .flat_map(|(of, wrt, block)| {
            encode(of, wrt, VariableRole::Partial, block.as_slice(), max_chunk)
        })
        .collect()
}

/// Scatter-writes a variable chunk into the matching buffer of `arrays`.
/// `cursor` tracks the stream's progress through each buffer.
///
/// # Errors
///
/// Returns [`Error::UnknownVariable`] if `arrays` has no buffer named
/// `chunk.name`, the validation errors of [`scatter`], and
/// [`Error::ChunkOutOfOrder`] from [`ChunkCursor::advance`].
pub fn write_chunk(
    arrays: &mut ArrayMap,
    role: Role,
    cursor: &mut ChunkCursor,
    chunk: &proto::ArrayChunk,
) -> Result<()> {
    let target = arrays
        .get_mut(&chunk.name)
        .ok_or_else(|| Error::UnknownVariable {
            name: chunk.name.clone(),
            role,
        })?;
    let size = target.len();
    scatter(
        target.as_mut_slice(),
        &chunk.name,
        chunk.start,
        chunk.end,
        &chunk.data,
    )?;
    cursor.advance(&chunk.name, "", chunk.start, chunk.end, size)
}

/// Scatter-writes a partial chunk into the block `(name, subname)`.
///
/// # Errors
///
/// Returns [`Error::UndeclaredPartialVariable`] if no such block exists, the
/// validation errors of [`scatter`], and [`Error::ChunkOutOfOrder`] from
/// [`ChunkCursor::advance`].
pub fn write_partial_chunk(
    jac: &mut Jacobian,
    cursor: &mut ChunkCursor,
    chunk: &proto::ArrayChunk,
) -> Result<()> {
    let block = jac
        .get_mut(&chunk.name, &chunk.subname)
        .ok_or_else(|| Error::UndeclaredPartialVariable {
            of: chunk.name.clone(),
            wrt: chunk.subname.clone(),
            missing: format!("{}/{}", chunk.name, chunk.subname),
        })?;
    let size = block.len();
    let label = format!("{}/{}", chunk.name, chunk.subname);
    scatter(block.as_mut_slice(), &label, chunk.start, chunk.end, &chunk.data)?;
    cursor.advance(&chunk.name, &chunk.subname, chunk.start, chunk.end, size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{array::Array, meta::Metadata};

    #[test]
    fn role_tags_map_to_wire_values() {
        assert_eq!(
            ChunkRole::try_from(VariableRole::Residual as i32).unwrap(),
            ChunkRole::Variable(Role::Residual)
        );
        assert_eq!(
            ChunkRole::try_from(VariableRole::Partial as i32).unwrap(),
            ChunkRole::Partial
        );
        assert_eq!(
            ChunkRole::try_from(42),
            Err(Error::InvalidRole { value: 42 })
        );
    }

    #[test]
    fn variable_metadata_survives_the_wire() {
        let v = VariableMeta {
            name: "x".to_string(),
            role: Role::Output,
            shape: vec![2, 3],
            units: "m".to_string(),
        };
        let msg = proto::VariableMetaData::from(&v);
        assert_eq!(msg.shape, vec![2, 3]);
        assert_eq!(VariableMeta::try_from(msg).unwrap(), v);
    }

    #[test]
    fn malformed_variable_metadata_is_rejected() {
        let msg = proto::VariableMetaData {
            name: "x".to_string(),
            role: VariableRole::Input as i32,
            shape: vec![2, 0],
            units: String::new(),
        };
        assert!(matches!(
            VariableMeta::try_from(msg),
            Err(Error::InvalidShape { .. })
        ));

        let msg = proto::VariableMetaData {
            name: "x".to_string(),
            role: VariableRole::Partial as i32,
            shape: vec![1],
            units: String::new(),
        };
        assert!(matches!(
            VariableMeta::try_from(msg),
            Err(Error::UnexpectedRole { .. })
        ));
    }

    #[test]
    fn encoded_map_scatters_back_into_fresh_buffers() {
        let mut meta = Metadata::explicit();
        meta.add_input("a", &[1], "").unwrap();
        meta.add_input("b", &[3, 4], "").unwrap();

        let mut source = meta.allocate(Role::Input);
        source["a"][0] = 7.0;
        for (i, v) in source["b"].as_mut_slice().iter_mut().enumerate() {
            *v = i as f64;
        }

        let chunks = encode_map(&source, Role::Input, 5);
        assert_eq!(chunks.len(), 1 + 3);
        assert!(chunks.iter().all(|c| c.data.len() as u64 == c.end - c.start));

        let mut target = meta.allocate(Role::Input);
        let mut cursor = ChunkCursor::new();
        for c in &chunks {
            write_chunk(&mut target, Role::Input, &mut cursor, c).unwrap();
        }
        cursor.finish().unwrap();
        assert_eq!(target, source);

        let err = write_chunk(&mut target, Role::Input, &mut cursor, &chunks[0]).unwrap_err();
        assert!(matches!(err, Error::ChunkOutOfOrder { expected: 1, .. }));
    }

    #[test]
    fn unknown_names_are_not_created() {
        let mut arrays: ArrayMap = [("x", Array::scalar(0.0))].into_iter().collect();
        let chunk = proto::ArrayChunk {
            name: "z".to_string(),
            role: VariableRole::Input as i32,
            start: 0,
            end: 1,
            data: vec![1.0],
            ..Default::default()
        };
        assert!(matches!(
            write_chunk(&mut arrays, Role::Input, &mut ChunkCursor::new(), &chunk),
            Err(Error::UnknownVariable { .. })
        ));
        assert_eq!(arrays.len(), 1);
    }

    #[test]
    fn partial_chunks_land_in_their_block() {
        let mut meta = Metadata::explicit();
        meta.add_input("x", &[2], "").unwrap();
        meta.add_output("f", &[2], "").unwrap();
        meta.declare_partials("f", "x");

        let mut source = meta.allocate_jacobian().unwrap();
        source[("f", "x")].assign("f/x", &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let chunks = encode_jacobian(&source, 3);
        assert!(chunks.iter().all(|c| c.subname == "x"
            && c.role == VariableRole::Partial as i32));

        let mut target = meta.allocate_jacobian().unwrap();
        let mut cursor = ChunkCursor::new();
        for c in &chunks {
            write_partial_chunk(&mut target, &mut cursor, c).unwrap();
        }
        assert_eq!(target, source);

        let stray = proto::ArrayChunk {
            name: "f".to_string(),
            subname: "y".to_string(),
            role: VariableRole::Partial as i32,
            start: 0,
            end: 1,
            data: vec![1.0],
        };
        assert!(write_partial_chunk(&mut target, &mut cursor, &stray).is_err());
    }
}

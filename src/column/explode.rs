//! Exploded column paths
//!
//! A record, tuple, array, or map can be spread across several columns:
//! dot paths for record fields (`stats.attack`) and tuple positions
//! (`pos._1`), bracket paths for arrays (`drops[1]`) and maps
//! (`weights[gold]`). Columns sharing a root name form a group whose
//! assembled nested value is exposed under the root.

use crate::registry::naming;
use crate::value::Value;
use indexmap::IndexMap;

/// One step of an exploded path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSeg {
    /// `.field`
    Field(String),
    /// `._N` (1-based tuple position)
    TupleIdx(usize),
    /// `[N]` (1-based array position)
    ArrayIdx(usize),
    /// `[key]`
    MapKey(String),
}

/// A parsed column name: root plus exploded segments (empty for plain
/// columns)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnPath {
    pub root: String,
    pub segs: Vec<PathSeg>,
}

impl ColumnPath {
    pub fn is_exploded(&self) -> bool {
        !self.segs.is_empty()
    }
}

/// Parse a header column name into root and segments
pub fn parse_column_path(name: &str) -> Result<ColumnPath, String> {
    let mut chars = name.char_indices().peekable();
    let root = take_ident(name, &mut chars)?;
    if !naming::is_field_name(&root) {
        return Err(format!("invalid column name: {}", root));
    }
    let mut segs = Vec::new();
    while let Some(&(_, c)) = chars.peek() {
        match c {
            '.' => {
                chars.next();
                let field = take_ident(name, &mut chars)?;
                if let Some(idx) = tuple_position(&field) {
                    segs.push(PathSeg::TupleIdx(idx));
                } else if naming::is_field_name(&field) {
                    segs.push(PathSeg::Field(field));
                } else {
                    return Err(format!("invalid path segment: {}", field));
                }
            }
            '[' => {
                chars.next();
                let mut key = String::new();
                loop {
                    match chars.next() {
                        Some((_, ']')) => break,
                        Some((_, c)) => key.push(c),
                        None => return Err(format!("unterminated '[' in column {}", name)),
                    }
                }
                if key.is_empty() {
                    return Err(format!("empty '[]' in column {}", name));
                }
                match key.parse::<usize>() {
                    Ok(0) => return Err("array positions are 1-based".to_string()),
                    Ok(idx) => segs.push(PathSeg::ArrayIdx(idx)),
                    Err(_) => segs.push(PathSeg::MapKey(key)),
                }
            }
            other => return Err(format!("unexpected '{}' in column {}", other, name)),
        }
    }
    Ok(ColumnPath { root, segs })
}

fn take_ident(
    name: &str,
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
) -> Result<String, String> {
    let mut out = String::new();
    while let Some(&(_, c)) = chars.peek() {
        if c == '_' || c.is_ascii_alphanumeric() {
            out.push(c);
            chars.next();
        } else {
            break;
        }
    }
    if out.is_empty() {
        return Err(format!("missing identifier in column {}", name));
    }
    Ok(out)
}

fn tuple_position(field: &str) -> Option<usize> {
    let digits = field.strip_prefix('_')?;
    let idx = digits.parse::<usize>().ok()?;
    (idx >= 1).then_some(idx)
}

/// Assemble the nested value of one exploded group.
///
/// `entries` pair each column's remaining segments with its parsed value,
/// in header order. Tuple positions and array positions must be
/// consecutive from 1.
pub fn assemble(entries: &[(&[PathSeg], &Value)]) -> Result<Value, String> {
    if entries.len() == 1 && entries[0].0.is_empty() {
        return Ok(entries[0].1.clone());
    }
    if entries.iter().any(|(segs, _)| segs.is_empty()) {
        return Err("a column cannot be both a value and a group root".to_string());
    }

    match entries[0].0[0] {
        PathSeg::Field(_) => {
            let groups = group_by_head(entries, |seg| match seg {
                PathSeg::Field(name) => Some(name.clone()),
                _ => None,
            })?;
            let mut fields = IndexMap::new();
            for (name, sub) in groups {
                fields.insert(name, assemble(&sub)?);
            }
            Ok(Value::Record(fields))
        }
        PathSeg::TupleIdx(_) => {
            let groups = group_by_head(entries, |seg| match seg {
                PathSeg::TupleIdx(i) => Some(*i),
                _ => None,
            })?;
            positional(groups).map(Value::Tuple)
        }
        PathSeg::ArrayIdx(_) => {
            let groups = group_by_head(entries, |seg| match seg {
                PathSeg::ArrayIdx(i) => Some(*i),
                _ => None,
            })?;
            positional(groups).map(Value::Array)
        }
        PathSeg::MapKey(_) => {
            let groups = group_by_head(entries, |seg| match seg {
                PathSeg::MapKey(key) => Some(key.clone()),
                _ => None,
            })?;
            let mut map = IndexMap::new();
            for (key, sub) in groups {
                let value = assemble(&sub)?;
                // absent optional entries stay out of the map
                if !value.is_nil() {
                    map.insert(key, value);
                }
            }
            Ok(Value::Map(map))
        }
    }
}

fn group_by_head<'v, K: PartialEq + Clone>(
    entries: &[(&'v [PathSeg], &'v Value)],
    head: impl Fn(&PathSeg) -> Option<K>,
) -> Result<Vec<(K, Vec<(&'v [PathSeg], &'v Value)>)>, String> {
    let mut groups: Vec<(K, Vec<(&[PathSeg], &Value)>)> = Vec::new();
    for (segs, value) in entries {
        let Some(key) = head(&segs[0]) else {
            return Err("mixed path kinds under one root".to_string());
        };
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, group)) => group.push((&segs[1..], value)),
            None => groups.push((key, vec![(&segs[1..], value)])),
        }
    }
    Ok(groups)
}

fn positional<K>(
    groups: Vec<(K, Vec<(&[PathSeg], &Value)>)>,
) -> Result<Vec<Value>, String>
where
    K: Into<usize> + Copy,
{
    let mut slots: Vec<(usize, Value)> = Vec::with_capacity(groups.len());
    for (idx, sub) in &groups {
        slots.push(((*idx).into(), assemble(sub)?));
    }
    slots.sort_by_key(|(i, _)| *i);
    for (expect, (i, _)) in slots.iter().enumerate() {
        if *i != expect + 1 {
            return Err("positions must be consecutive from 1".to_string());
        }
    }
    Ok(slots.into_iter().map(|(_, v)| v).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_column() {
        let path = parse_column_path("level").unwrap();
        assert_eq!(path.root, "level");
        assert!(!path.is_exploded());
    }

    #[test]
    fn test_dot_path() {
        let path = parse_column_path("stats.attack").unwrap();
        assert_eq!(path.segs, vec![PathSeg::Field("attack".into())]);
    }

    #[test]
    fn test_tuple_path() {
        let path = parse_column_path("pos._2").unwrap();
        assert_eq!(path.segs, vec![PathSeg::TupleIdx(2)]);
    }

    #[test]
    fn test_bracket_paths() {
        assert_eq!(
            parse_column_path("drops[1]").unwrap().segs,
            vec![PathSeg::ArrayIdx(1)]
        );
        assert_eq!(
            parse_column_path("weights[gold]").unwrap().segs,
            vec![PathSeg::MapKey("gold".into())]
        );
    }

    #[test]
    fn test_bad_paths() {
        assert!(parse_column_path("drops[0]").is_err());
        assert!(parse_column_path("drops[").is_err());
        assert!(parse_column_path("a.").is_err());
    }

    #[test]
    fn test_assemble_record() {
        let attack = Value::Int(5);
        let defense = Value::Int(3);
        let a = [PathSeg::Field("attack".to_string())];
        let d = [PathSeg::Field("defense".to_string())];
        let value = assemble(&[(&a[..], &attack), (&d[..], &defense)]).unwrap();
        let Value::Record(fields) = value else {
            panic!("expected record");
        };
        assert_eq!(fields["attack"], Value::Int(5));
        assert_eq!(fields["defense"], Value::Int(3));
    }

    #[test]
    fn test_assemble_tuple_requires_consecutive() {
        let one = Value::Int(1);
        let three = Value::Int(3);
        let s1 = [PathSeg::TupleIdx(1)];
        let s3 = [PathSeg::TupleIdx(3)];
        assert!(assemble(&[(&s1[..], &one), (&s3[..], &three)]).is_err());
    }

    #[test]
    fn test_assemble_nested() {
        let x = Value::Int(1);
        let y = Value::Int(2);
        let sx = [
            PathSeg::Field("pos".to_string()),
            PathSeg::TupleIdx(1),
        ];
        let sy = [
            PathSeg::Field("pos".to_string()),
            PathSeg::TupleIdx(2),
        ];
        let value = assemble(&[(&sx[..], &x), (&sy[..], &y)]).unwrap();
        let Value::Record(fields) = value else {
            panic!("expected record");
        };
        assert_eq!(
            fields["pos"],
            Value::Tuple(vec![Value::Int(1), Value::Int(2)])
        );
    }

    #[test]
    fn test_assemble_map_drops_nil() {
        let gold = Value::Float(0.5);
        let nil = Value::Nil;
        let sg = [PathSeg::MapKey("gold".to_string())];
        let sn = [PathSeg::MapKey("gem".to_string())];
        let value = assemble(&[(&sg[..], &gold), (&sn[..], &nil)]).unwrap();
        let Value::Map(entries) = value else {
            panic!("expected map");
        };
        assert_eq!(entries.len(), 1);
    }
}

use crate::asset::Asset;
use crate::pipeline::Bundle;

/// Concatenates every record into a single file, joined by newlines.
///
/// The merged record takes the directory of the first input, and the source
/// maps of the inputs (if any) are merged.
#[derive(Debug, Clone)]
pub struct Concat {
    name: String,
}

impl Concat {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Bundle for Concat {
    fn name(&self) -> &str {
        "concat"
    }

    fn bundle(&self, assets: Vec<Asset>) -> anyhow::Result<Option<Asset>> {
        let mut iter = assets.into_iter();
        let Some(first) = iter.next() else {
            return Ok(None);
        };

        let mut merged = Asset {
            path: first.path.with_file_name(&self.name),
            ..first
        };

        for asset in iter {
            if !merged.data.ends_with(b"\n") {
                merged.data.push(b'\n');
            }
            merged.data.extend_from_slice(&asset.data);

            if let Some(other) = asset.sourcemap {
                match &mut merged.sourcemap {
                    Some(map) => map.extend(other),
                    None => merged.sourcemap = Some(other),
                }
            }
        }

        Ok(Some(merged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::SourceMap;

    #[test]
    fn test_concat_order_and_maps() {
        let mut a = Asset::new("src/a.coffee", "lib/a.js", "var a;");
        a.sourcemap = Some(SourceMap::new("a.coffee", "a = 1"));
        let mut b = Asset::new("src/b.coffee", "b.js", "var b;\n");
        b.sourcemap = Some(SourceMap::new("b.coffee", "b = 2"));

        let merged = Concat::new("app.js").bundle(vec![a, b]).unwrap().unwrap();

        assert_eq!(merged.path, "lib/app.js");
        assert_eq!(merged.text().unwrap(), "var a;\nvar b;\n");
        assert_eq!(merged.sourcemap.unwrap().sources, vec!["a.coffee", "b.coffee"]);
    }

    #[test]
    fn test_concat_empty() {
        assert!(Concat::new("x.js").bundle(vec![]).unwrap().is_none());
    }
}

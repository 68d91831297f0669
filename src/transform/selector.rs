use crate::asset::Asset;
use crate::pipeline::Transform;

/// Fails a stylesheet whose selector count exceeds a limit.
///
/// Old Internet Explorer versions silently ignore every selector past the
/// 4095th in a single stylesheet; projects usually pick a lower budget.
#[derive(Debug, Clone, Copy)]
pub struct SelectorLimit {
    limit: usize,
}

impl SelectorLimit {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

impl Transform for SelectorLimit {
    fn name(&self) -> &str {
        "selector-limit"
    }

    fn apply(&self, asset: Asset) -> anyhow::Result<Asset> {
        let count = count_selectors(asset.text()?);

        if count > self.limit {
            anyhow::bail!("{count} selectors, limit is {}", self.limit);
        }

        tracing::debug!(path = %asset.path, count, limit = self.limit, "selector count");
        Ok(asset)
    }
}

enum Block {
    /// A level where nested rules may appear (top level, `@media`, ...).
    Rules,
    /// A declaration block or an at-rule whose body holds no selectors.
    Skip,
}

/// Counts the selectors in a stylesheet. Selectors inside conditional group
/// rules such as `@media` are counted, keyframe selectors are not.
pub fn count_selectors(css: &str) -> usize {
    let css = strip_comments(css);

    let mut stack = vec![Block::Rules];
    let mut prelude = String::new();
    let mut count = 0;

    for c in css.chars() {
        match stack.last() {
            Some(Block::Skip) => match c {
                '{' => stack.push(Block::Skip),
                '}' => {
                    stack.pop();
                }
                _ => {}
            },
            Some(Block::Rules) | None => match c {
                '{' => {
                    let head = prelude.trim();

                    if let Some(rule) = head.strip_prefix('@') {
                        let keyword = rule.split_whitespace().next().unwrap_or_default();
                        if matches!(keyword, "media" | "supports" | "document" | "layer" | "container") {
                            stack.push(Block::Rules);
                        } else {
                            stack.push(Block::Skip);
                        }
                    } else {
                        count += head.split(',').filter(|s| !s.trim().is_empty()).count();
                        stack.push(Block::Skip);
                    }

                    prelude.clear();
                }
                '}' => {
                    if stack.len() > 1 {
                        stack.pop();
                    }
                    prelude.clear();
                }
                ';' => prelude.clear(),
                _ => prelude.push(c),
            },
        }
    }

    count
}

fn strip_comments(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut rest = css;

    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find("*/") {
            Some(end) => rest = &rest[start + 2 + end + 2..],
            None => {
                rest = "";
                break;
            }
        }
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_simple() {
        let css = "a, b > c { color: red } .x{margin:0}";
        assert_eq!(count_selectors(css), 3);
    }

    #[test]
    fn test_count_media_and_keyframes() {
        let css = r#"
            @charset "utf-8";
            /* a, b { } */
            @media (min-width: 10px) { .a, .b { x: y } .c { x: y } }
            @keyframes spin { from { x: 0 } to { x: 1 } }
            @font-face { font-family: f; }
            .d { x: y }
        "#;
        assert_eq!(count_selectors(css), 4);
    }

    #[test]
    fn test_limit_exceeded() {
        let asset = Asset::new("s.css", "s.css", "a{x:y} b{x:y} c{x:y}");
        assert!(SelectorLimit::new(2).apply(asset.clone()).is_err());
        assert!(SelectorLimit::new(3).apply(asset).is_ok());
    }
}

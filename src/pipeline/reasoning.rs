//! 离线推理摘要
//!
//! 能力在回合中途被熔断时，用 Planning / Guidance 的文本确定性地合成一段推理摘要（不调用模型），
//! 让 Execution 阶段拿到与能力可用时形状一致的上下文。

/// 摘要最多保留的要点数
const MAX_POINTS: usize = 6;
const POINT_CHARS: usize = 160;

pub const SUMMARY_LABEL: &str = "[Reasoning summary]";

/// 去掉列表前缀（`- `、`* `、`1.`、`2)`）
fn strip_marker(line: &str) -> Option<&str> {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
        return Some(rest.trim());
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return Some(rest.trim());
        }
    }
    None
}

/// 列表项优先；没有列表项时取每段的首句
fn key_points(text: &str) -> Vec<String> {
    let listed: Vec<String> = text
        .lines()
        .filter_map(strip_marker)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();
    if !listed.is_empty() {
        return listed;
    }
    text.split("\n\n")
        .filter_map(|para| {
            let para = para.trim();
            if para.is_empty() {
                return None;
            }
            let end = para
                .find(|c| matches!(c, '.' | '!' | '?' | '。' | '！' | '？'))
                .map(|i| i + para[i..].chars().next().map_or(1, char::len_utf8))
                .unwrap_or(para.len());
            Some(para[..end].replace('\n', " "))
        })
        .collect()
}

/// 合成摘要；两段文本都为空时返回 None
pub fn synthesize_summary(planning: &str, guidance: &str) -> Option<String> {
    let mut points: Vec<String> = Vec::new();
    for p in key_points(planning).into_iter().chain(key_points(guidance)) {
        let p = crate::llm::truncate_chars(&p, POINT_CHARS);
        if !points.contains(&p) {
            points.push(p);
        }
        if points.len() == MAX_POINTS {
            break;
        }
    }
    if points.is_empty() {
        return None;
    }
    let body = points
        .iter()
        .map(|p| format!("- {}", p))
        .collect::<Vec<_>>()
        .join("\n");
    Some(format!("{}\n{}", SUMMARY_LABEL, body))
}

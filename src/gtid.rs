//! GTID (Global Transaction ID) 집합 관리
//!
//! 단일 GTID 형식: UUID:sequence
//! 집합 형식: "uuid1:1-100:200,uuid2:1-50" (UUID별 인터벌은 ':'로, UUID 사이는 ','로 구분)

use crate::error::{CdcError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 연속된 sequence 구간 (양 끝 포함)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GtidInterval {
    pub start: u64,
    pub end: u64,
}

impl GtidInterval {
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start == 0 || start > end {
            return Err(CdcError::GtidError(format!(
                "Invalid interval: {}-{}",
                start, end
            )));
        }
        Ok(GtidInterval { start, end })
    }

    pub fn contains(&self, sequence: u64) -> bool {
        sequence >= self.start && sequence <= self.end
    }

    /// 겹치거나 맞닿은 구간 병합
    fn merge(&self, other: &GtidInterval) -> Option<GtidInterval> {
        if self.end.saturating_add(1) >= other.start && other.end.saturating_add(1) >= self.start {
            Some(GtidInterval {
                start: self.start.min(other.start),
                end: self.end.max(other.end),
            })
        } else {
            None
        }
    }

    /// "N" 또는 "N-M" 파싱
    fn parse(text: &str) -> Result<Self> {
        match text.split_once('-') {
            Some((s, e)) => {
                let start = s
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| CdcError::GtidError(format!("Invalid interval: {}", text)))?;
                let end = e
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| CdcError::GtidError(format!("Invalid interval: {}", text)))?;
                GtidInterval::new(start, end)
            }
            None => {
                let seq = text
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| CdcError::GtidError(format!("Invalid sequence: {}", text)))?;
                GtidInterval::new(seq, seq)
            }
        }
    }
}

impl fmt::Display for GtidInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// 전체 GTID 집합 (서버 UUID -> 정렬된 인터벌들)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GtidSet {
    sets: BTreeMap<String, Vec<GtidInterval>>,
}

impl GtidSet {
    pub fn new() -> Self {
        GtidSet::default()
    }

    /// GTID 집합 문자열 파싱
    ///
    /// UUID 사이를 ','로 구분하는 표준 형식과, 하나의 UUID 뒤에
    /// ','로 인터벌이 이어지는 느슨한 형식 모두 받아들입니다.
    pub fn parse(text: &str) -> Result<Self> {
        let mut set = GtidSet::new();
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
            return Ok(set);
        }

        let mut current_uuid: Option<String> = None;
        for part in trimmed.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match part.split_once(':') {
                Some((uuid, intervals)) => {
                    let uuid = uuid.trim().to_string();
                    for interval in intervals.split(':') {
                        set.insert_interval(&uuid, GtidInterval::parse(interval)?);
                    }
                    current_uuid = Some(uuid);
                }
                None => {
                    // UUID 없는 인터벌은 직전 UUID의 연속으로 처리
                    let uuid = current_uuid.clone().ok_or_else(|| {
                        CdcError::GtidError(format!("Interval without UUID: {}", part))
                    })?;
                    set.insert_interval(&uuid, GtidInterval::parse(part)?);
                }
            }
        }
        Ok(set)
    }

    /// 단일 GTID 추가 (format: "uuid:N" 또는 "uuid:N-M")
    pub fn add_gtid(&mut self, gtid: &str) -> Result<()> {
        let (uuid, rest) = gtid
            .split_once(':')
            .ok_or_else(|| CdcError::GtidError(format!("Invalid GTID format: {}", gtid)))?;
        for interval in rest.split(':') {
            self.insert_interval(uuid.trim(), GtidInterval::parse(interval)?);
        }
        Ok(())
    }

    fn insert_interval(&mut self, uuid: &str, interval: GtidInterval) {
        let intervals = self.sets.entry(uuid.to_string()).or_default();
        intervals.push(interval);
        intervals.sort();

        // 정렬 후 인접/중복 구간을 한 번에 병합
        let mut merged: Vec<GtidInterval> = Vec::with_capacity(intervals.len());
        for iv in intervals.drain(..) {
            match merged.last_mut() {
                Some(last) => {
                    if let Some(m) = last.merge(&iv) {
                        *last = m;
                    } else {
                        merged.push(iv);
                    }
                }
                None => merged.push(iv),
            }
        }
        *intervals = merged;
    }

    pub fn contains(&self, gtid: &str) -> bool {
        let Some((uuid, seq)) = gtid.split_once(':') else {
            return false;
        };
        let Ok(sequence) = seq.trim().parse::<u64>() else {
            return false;
        };
        self.sets
            .get(uuid.trim())
            .map(|ivs| ivs.iter().any(|iv| iv.contains(sequence)))
            .unwrap_or(false)
    }

    /// other에 포함된 구간을 제거한 새 집합 반환
    pub fn subtract(&self, other: &GtidSet) -> GtidSet {
        let mut result = self.clone();
        for (uuid, other_ivs) in &other.sets {
            let Some(ivs) = result.sets.get_mut(uuid) else {
                continue;
            };
            for other_iv in other_ivs {
                let mut next = Vec::with_capacity(ivs.len());
                for iv in ivs.iter() {
                    if iv.end < other_iv.start || iv.start > other_iv.end {
                        next.push(*iv);
                        continue;
                    }
                    if iv.start < other_iv.start {
                        next.push(GtidInterval {
                            start: iv.start,
                            end: other_iv.start - 1,
                        });
                    }
                    if iv.end > other_iv.end {
                        next.push(GtidInterval {
                            start: other_iv.end + 1,
                            end: iv.end,
                        });
                    }
                }
                *ivs = next;
            }
        }
        result.sets.retain(|_, ivs| !ivs.is_empty());
        result
    }

    pub fn is_empty(&self) -> bool {
        self.sets.values().all(|ivs| ivs.is_empty())
    }
}

impl fmt::Display for GtidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (uuid, intervals) in &self.sets {
            if intervals.is_empty() {
                continue;
            }
            if !first {
                write!(f, ",")?;
            }
            first = false;
            write!(f, "{}", uuid)?;
            for iv in intervals {
                write!(f, ":{}", iv)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "550e8400-e29b-41d4-a716-446655440000";

    #[test]
    fn test_parse_canonical() {
        let set = GtidSet::parse(&format!("{}:1-100:200", UUID)).unwrap();
        assert!(set.contains(&format!("{}:50", UUID)));
        assert!(set.contains(&format!("{}:200", UUID)));
        assert!(!set.contains(&format!("{}:150", UUID)));
    }

    #[test]
    fn test_parse_loose_intervals() {
        // 느슨한 형식: UUID 절 뒤에 ','로 이어지는 인터벌
        let set = GtidSet::parse(&format!("{}:1-100,200,300-400", UUID)).unwrap();
        assert!(set.contains(&format!("{}:350", UUID)));
        assert!(set.contains(&format!("{}:200", UUID)));
    }

    #[test]
    fn test_parse_empty() {
        assert!(GtidSet::parse("").unwrap().is_empty());
        assert!(GtidSet::parse("NULL").unwrap().is_empty());
    }

    #[test]
    fn test_add_gtid_merges_adjacent() {
        let mut set = GtidSet::new();
        set.add_gtid(&format!("{}:1", UUID)).unwrap();
        set.add_gtid(&format!("{}:2", UUID)).unwrap();
        set.add_gtid(&format!("{}:3", UUID)).unwrap();
        assert_eq!(set.to_string(), format!("{}:1-3", UUID));
    }

    #[test]
    fn test_add_gtid_interval_form() {
        let mut set = GtidSet::new();
        set.add_gtid("uuid:1-5").unwrap();
        assert_eq!(set.to_string(), "uuid:1-5");
    }

    #[test]
    fn test_add_gtid_invalid() {
        let mut set = GtidSet::new();
        assert!(set.add_gtid("no-colon-here").is_err());
        assert!(set.add_gtid("uuid:abc").is_err());
    }

    #[test]
    fn test_subtract() {
        let all = GtidSet::parse(&format!("{}:1-100", UUID)).unwrap();
        let done = GtidSet::parse(&format!("{}:1-40:61-100", UUID)).unwrap();
        let remaining = all.subtract(&done);
        assert_eq!(remaining.to_string(), format!("{}:41-60", UUID));
    }

    #[test]
    fn test_display_multiple_uuids() {
        let mut set = GtidSet::new();
        set.add_gtid("aaa:1-3").unwrap();
        set.add_gtid("bbb:7").unwrap();
        assert_eq!(set.to_string(), "aaa:1-3,bbb:7");
    }
}

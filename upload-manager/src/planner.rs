use super::{
    part_definition::{EmergePartDefinition, UploadSubpart},
    write_intent::{OutboundSource, WriteIntent},
};
use b2_apis::{
    account::AccountInfo,
    http_client::{ApiResult, Error},
    utils::hex_sha1_of_bytes,
};
use std::collections::VecDeque;

const MEGABYTE: u64 = 1000 * 1000;
const GIGABYTE: u64 = 1000 * MEGABYTE;

/// 拼装规划器
///
/// 把按目标偏移排序的写意图序列变换为合法的拼装分片序列，
/// 让每个分片的长度落在服务端允许的范围内。
/// 重叠的意图按"本地上传优先"解决，除非拷贝范围已达到最小分片大小。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmergePlanner {
    min_part_size: u64,
    recommended_part_size: u64,
    max_part_size: u64,
}

impl Default for EmergePlanner {
    fn default() -> Self {
        Self::new(5 * MEGABYTE, 100 * MEGABYTE, 5 * GIGABYTE)
    }
}

impl EmergePlanner {
    /// 创建拼装规划器
    ///
    /// 配置会被规整为 `min ≤ recommended ≤ max`。
    pub fn new(min_part_size: u64, recommended_part_size: u64, max_part_size: u64) -> Self {
        let min_part_size = min_part_size.min(recommended_part_size).min(max_part_size);
        let recommended_part_size = recommended_part_size.min(max_part_size);
        Self {
            min_part_size,
            recommended_part_size,
            max_part_size,
        }
    }

    /// 以账户状态中的分片大小限制创建拼装规划器
    pub fn from_account_info(account_info: &dyn AccountInfo) -> ApiResult<Self> {
        Ok(Self::new(
            account_info.absolute_minimum_part_size()?,
            account_info.recommended_part_size()?,
            account_info.maximum_part_size()?,
        ))
    }

    /// 最小分片大小
    #[inline]
    pub fn min_part_size(&self) -> u64 {
        self.min_part_size
    }

    /// 建议分片大小
    #[inline]
    pub fn recommended_part_size(&self) -> u64 {
        self.recommended_part_size
    }

    /// 最大分片大小
    #[inline]
    pub fn max_part_size(&self) -> u64 {
        self.max_part_size
    }

    /// 生成拼装方案
    ///
    /// 意图的目标范围必须无洞覆盖 `[0, 总长)`，出现空洞时报错。
    pub fn get_emerge_plan(&self, mut write_intents: Vec<WriteIntent>) -> ApiResult<EmergePlan> {
        write_intents.sort_by_key(WriteIntent::destination_offset);
        let fragments = self.select_intent_fragments(&write_intents)?;
        let parts = self.get_emerge_parts(&write_intents, &fragments)?;
        Ok(EmergePlan::new(parts))
    }

    fn select_intent_fragments(&self, intents: &[WriteIntent]) -> ApiResult<Vec<(usize, u64)>> {
        let mut upload_state = IntentsState::new(0);
        let mut copy_state = IntentsState::new(self.min_part_size);

        let mut fragments = Vec::new();
        let mut last_sent_offset = 0;
        for incoming in (0..intents.len()).map(Some).chain(std::iter::once(None)) {
            let incoming_offset = incoming.map(|idx| intents[idx].destination_offset());

            let upload_intents = upload_state.state_update(last_sent_offset, incoming_offset, intents);
            let copy_intents = copy_state.state_update(last_sent_offset, incoming_offset, intents);

            for (idx, fragment_end) in merge_intent_fragments(upload_intents, copy_intents) {
                fragments.push((idx, fragment_end));
                last_sent_offset = fragment_end;
            }

            if let Some(incoming_offset) = incoming_offset {
                if last_sent_offset < incoming_offset {
                    return Err(Error::InvalidArgument {
                        message: "Cannot emerge file with holes".to_owned(),
                    });
                }
            }

            if let Some(idx) = incoming {
                if intents[idx].is_upload() {
                    upload_state.add(idx, intents);
                } else {
                    copy_state.add(idx, intents);
                }
            }
        }
        Ok(fragments)
    }

    fn get_emerge_parts(
        &self,
        intents: &[WriteIntent],
        fragments: &[(usize, u64)],
    ) -> ApiResult<Vec<EmergePartDefinition>> {
        let min_part_size = self.min_part_size;
        let mut parts = Vec::new();

        let mut buff: Vec<(usize, u64)> = Vec::new();
        let mut buff_start = 0u64;
        let mut buff_end = 0u64;
        let mut current: Option<usize> = None;
        let mut current_end = 0u64;

        let with_sentinel = fragments
            .iter()
            .map(|&(idx, end)| (Some(idx), end))
            .chain(std::iter::once((None, 0)));
        for (intent, fragment_end) in with_sentinel {
            if current.is_none() {
                current = intent;
                current_end = fragment_end;
                continue;
            }
            if intent == current {
                current_end = fragment_end;
                continue;
            }

            let cur = current.unwrap();
            let current_len = current_end - buff_end;
            let buff_len = buff_end - buff_start;
            if intents[cur].is_copy() && current_len >= min_part_size {
                let missing_length = if !buff.is_empty() && buff_len < min_part_size {
                    min_part_size - buff_len
                } else {
                    0
                };
                if missing_length > 0 && current_len - missing_length < min_part_size {
                    // 拷贝不是"小拷贝"，但上传缓冲过小，而拷贝又不够在填补
                    // 缓冲之余再凑出一个最小分片，只能把拷贝并入上传缓冲
                    buff.push((cur, current_end));
                } else {
                    if missing_length > 0 {
                        // 从拷贝头部"借"一段补足上传缓冲到最小分片大小
                        buff_end += missing_length;
                        buff.push((cur, buff_end));
                    }
                    for (sub_start, sub_buff) in self.buff_split(&buff, buff_start) {
                        parts.push(make_upload_part(intents, &sub_buff, sub_start));
                    }
                    parts.extend(self.make_copy_parts(intents, cur, buff_end, current_end));
                    buff.clear();
                    buff_start = current_end;
                    buff_end = buff_start;
                }
            } else {
                buff.push((cur, current_end));
                buff_end = current_end;
                let mut buff_parts = self.buff_split(&buff, buff_start);
                let (last_start, last_buff) = buff_parts.pop().unwrap();
                for (sub_start, sub_buff) in &buff_parts {
                    parts.push(make_upload_part(intents, sub_buff, *sub_start));
                }
                buff_start = last_start;
                buff = last_buff;
            }

            current = intent;
            current_end = fragment_end;
            if current.is_none() {
                for (sub_start, sub_buff) in self.buff_split(&buff, buff_start) {
                    parts.push(make_upload_part(intents, &sub_buff, sub_start));
                }
            }
        }
        Ok(parts)
    }

    fn make_copy_parts(
        &self,
        intents: &[WriteIntent],
        copy_idx: usize,
        start_offset: u64,
        end_offset: u64,
    ) -> Vec<EmergePartDefinition> {
        let fragment_length = end_offset - start_offset;
        let mut part_count = fragment_length / self.max_part_size;
        let mut last_part_length = fragment_length % self.max_part_size;
        if last_part_length == 0 {
            last_part_length = self.max_part_size;
        } else {
            part_count += 1;
        }

        let part_sizes = if part_count == 1 {
            vec![last_part_length]
        } else {
            if last_part_length < fragment_length / (part_count + 1) {
                part_count += 1;
            }
            let base_part_size = fragment_length / part_count;
            let size_remainder = fragment_length % part_count;
            (0..part_count)
                .map(|index| base_part_size + u64::from(index < size_remainder))
                .collect()
        };

        let OutboundSource::Copy(copy_source) = intents[copy_idx].source() else {
            unreachable!("copy part from a non-copy intent");
        };
        let mut relative_offset = start_offset - intents[copy_idx].destination_offset();
        let mut parts = Vec::with_capacity(part_sizes.len());
        for part_size in part_sizes {
            parts.push(EmergePartDefinition::Copy {
                source: copy_source.to_owned(),
                relative_offset,
                length: part_size,
            });
            relative_offset += part_size;
        }
        parts
    }

    #[allow(clippy::type_complexity)]
    fn buff_split(&self, buff: &[(usize, u64)], mut buff_start: u64) -> Vec<(u64, Vec<(usize, u64)>)> {
        let mut out = Vec::new();
        if buff.is_empty() {
            return out;
        }
        let mut buff = buff.to_vec();
        loop {
            let buff_end = buff.last().unwrap().1;
            if buff_end - buff_start < self.recommended_part_size + self.min_part_size {
                out.push((buff_start, buff));
                return out;
            }
            let (left_buff, split_offset, right_buff) = self.buff_partition(&buff, buff_start);
            out.push((buff_start, left_buff));
            buff_start = split_offset;
            buff = right_buff;
        }
    }

    #[allow(clippy::type_complexity)]
    fn buff_partition(
        &self,
        buff: &[(usize, u64)],
        buff_start: u64,
    ) -> (Vec<(usize, u64)>, u64, Vec<(usize, u64)>) {
        let mut left_buff = Vec::new();
        let mut split_offset = buff_start;
        for (index, &(intent, fragment_end)) in buff.iter().enumerate() {
            let candidate_size = fragment_end - buff_start;
            if candidate_size > self.recommended_part_size {
                let right_fragment_size = candidate_size - self.recommended_part_size;
                split_offset = fragment_end - right_fragment_size;
                left_buff.push((intent, split_offset));
                return (left_buff, split_offset, buff[index..].to_vec());
            }
            left_buff.push((intent, fragment_end));
            split_offset = fragment_end;
            if candidate_size == self.recommended_part_size {
                return (left_buff, split_offset, buff[index + 1..].to_vec());
            }
        }
        (left_buff, split_offset, Vec::new())
    }
}

fn make_upload_part(intents: &[WriteIntent], buff: &[(usize, u64)], buff_start: u64) -> EmergePartDefinition {
    if buff.len() == 1 && intents[buff[0].0].is_upload() {
        let (idx, buff_end) = buff[0];
        let OutboundSource::Upload(source) = intents[idx].source() else {
            unreachable!("upload part from a non-upload intent");
        };
        EmergePartDefinition::Upload {
            source: source.to_owned(),
            relative_offset: buff_start - intents[idx].destination_offset(),
            length: buff_end - buff_start,
        }
    } else {
        let mut subparts = Vec::with_capacity(buff.len());
        let mut fragment_start = buff_start;
        for &(idx, fragment_end) in buff {
            let relative_offset = fragment_start - intents[idx].destination_offset();
            let length = fragment_end - fragment_start;
            subparts.push(match intents[idx].source() {
                OutboundSource::Upload(source) => UploadSubpart::Local {
                    source: source.to_owned(),
                    relative_offset,
                    length,
                },
                OutboundSource::Copy(source) => UploadSubpart::Remote {
                    source: source.to_owned(),
                    relative_offset,
                    length,
                },
            });
            fragment_start = fragment_end;
        }
        EmergePartDefinition::Subparts { subparts }
    }
}

fn merge_intent_fragments(
    upload_intents: Vec<(usize, u64, bool)>,
    copy_intents: Vec<(usize, u64, bool)>,
) -> Vec<(usize, u64)> {
    let mut upload_intents = VecDeque::from(upload_intents);
    let mut copy_intents = VecDeque::from(copy_intents);
    let mut fragments = Vec::new();
    loop {
        match (upload_intents.front().copied(), copy_intents.front().copied()) {
            (Some((upload_idx, upload_end, _)), Some((copy_idx, copy_end, copy_protected))) => {
                // 上传胜出，除非拷贝已经受保护（达到最小分片大小）
                let yield_idx = if copy_protected { copy_idx } else { upload_idx };
                let fragment_end = upload_end.min(copy_end);
                fragments.push((yield_idx, fragment_end));
                if fragment_end >= upload_end {
                    upload_intents.pop_front();
                }
                if fragment_end >= copy_end {
                    copy_intents.pop_front();
                }
            }
            (Some((upload_idx, upload_end, _)), None) => {
                fragments.push((upload_idx, upload_end));
                upload_intents.pop_front();
            }
            (None, Some((copy_idx, copy_end, _))) => {
                fragments.push((copy_idx, copy_end));
                copy_intents.pop_front();
            }
            (None, None) => return fragments,
        }
    }
}

#[derive(Debug, Copy, Clone)]
struct StateItem {
    idx: usize,
    end: u64,
}

/// 单一种类意图（上传或拷贝）的重叠解析状态
///
/// 拷贝意图的保护长度为最小分片大小，上传意图不设保护长度，
/// 因此每轮最多产生一个上传片段，但算法不依赖这一点。
#[derive(Debug)]
struct IntentsState {
    protected_intent_length: u64,
    current: Option<StateItem>,
    current_start: u64,
    next: Option<StateItem>,
}

impl IntentsState {
    fn new(protected_intent_length: u64) -> Self {
        Self {
            protected_intent_length,
            current: None,
            current_start: 0,
            next: None,
        }
    }

    fn add(&mut self, idx: usize, intents: &[WriteIntent]) {
        let incoming = StateItem {
            idx,
            end: intents[idx].destination_end_offset(),
        };
        match self.next {
            None => self.next = Some(incoming),
            // 两个候选重叠时保留目标结束偏移更大的那个
            Some(next) if incoming.end > next.end => self.next = Some(incoming),
            _ => {}
        }
    }

    fn state_update(
        &mut self,
        mut last_sent_offset: u64,
        incoming_offset: Option<u64>,
        intents: &[WriteIntent],
    ) -> Vec<(usize, u64, bool)> {
        let mut fragments = Vec::new();
        if let Some(current) = self.current {
            if last_sent_offset >= current.end {
                self.current = None;
            }
        }

        let effective_incoming_offset = match (incoming_offset, self.next, self.current) {
            (Some(offset), _, _) => offset,
            (None, Some(next), _) => next.end,
            (None, None, Some(current)) => current.end,
            (None, None, None) => return fragments,
        };

        if self.current.is_none() {
            if let Some(next) = self.next {
                if intents[next.idx].destination_offset() != effective_incoming_offset || incoming_offset.is_none() {
                    self.current = Some(next);
                    self.current_start = last_sent_offset;
                    self.next = None;
                }
            }
        }

        // current 与 next 同时存在只可能因为两者重叠
        if let (Some(current), Some(next)) = (self.current, self.next) {
            if effective_incoming_offset > current.end {
                if !self.is_current_protected(current) {
                    self.current = Some(next);
                    self.current_start = last_sent_offset;
                    self.next = None;
                } else {
                    let remaining_len = self
                        .protected_intent_length
                        .saturating_sub(last_sent_offset - self.current_start);
                    if remaining_len > 0 {
                        last_sent_offset += remaining_len;
                        if !self.can_be_protected(last_sent_offset, next.end) {
                            last_sent_offset = current.end;
                        }
                        fragments.push((current.idx, last_sent_offset, true));
                    }
                    self.current = Some(next);
                    self.current_start = last_sent_offset;
                    self.next = None;
                }
            }
        }

        if let Some(current) = self.current {
            fragments.push((
                current.idx,
                effective_incoming_offset.min(current.end),
                self.is_current_protected(current),
            ));
        }
        fragments
    }

    fn is_current_protected(&self, current: StateItem) -> bool {
        self.can_be_protected(self.current_start, current.end)
    }

    fn can_be_protected(&self, start: u64, end: u64) -> bool {
        end - start >= self.protected_intent_length
    }
}

/// 拼装方案
///
/// 单分片方案直接以小文件上传或整体拷贝执行；
/// 多分片方案通过大文件会话执行。
#[derive(Debug, Clone)]
pub struct EmergePlan {
    parts: Vec<EmergePartDefinition>,
}

impl EmergePlan {
    fn new(parts: Vec<EmergePartDefinition>) -> Self {
        Self { parts }
    }

    /// 是否需要大文件会话
    #[inline]
    pub fn is_large_file(&self) -> bool {
        self.parts.len() > 1
    }

    /// 拼装分片列表
    #[inline]
    pub fn parts(&self) -> &[EmergePartDefinition] {
        &self.parts
    }

    /// 方案的总长度
    pub fn total_length(&self) -> u64 {
        self.parts.iter().map(EmergePartDefinition::length).sum()
    }

    /// 确定性方案 ID
    ///
    /// 仅当每个分片都能在本地完成哈希时存在，
    /// 是（数据源 SHA-1，相对偏移，长度）三元组有序列表的 JSON 序列化的 SHA-1。
    /// 含拷贝数据源的方案没有方案 ID。
    pub fn plan_id(&self) -> ApiResult<Option<String>> {
        let mut triples = Vec::new();
        for part in &self.parts {
            if !part.append_id_triples(&mut triples)? {
                return Ok(None);
            }
        }
        let serialized = serde_json::to_vec(&triples).map_err(|err| Error::InvalidArgument {
            message: format!("cannot serialize plan id source: {err}"),
        })?;
        Ok(Some(hex_sha1_of_bytes(&serialized)))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        super::{copy_source::CopySource, upload_source::UploadSourceBytes},
        *,
    };
    use std::sync::Arc;

    fn planner() -> EmergePlanner {
        EmergePlanner::new(200, 200, 1000)
    }

    fn upload_intent(data: &[u8], offset: u64) -> WriteIntent {
        WriteIntent::upload(Arc::new(UploadSourceBytes::new(data.to_vec())), offset)
    }

    fn copy_intent(file_id: &str, length: u64, offset: u64) -> WriteIntent {
        WriteIntent::copy(CopySource::new(file_id, 0, Some(length), None).unwrap(), offset).unwrap()
    }

    fn part_lengths(plan: &EmergePlan) -> Vec<u64> {
        plan.parts().iter().map(EmergePartDefinition::length).collect()
    }

    #[test]
    fn test_single_intent_single_part() -> ApiResult<()> {
        let plan = planner().get_emerge_plan(vec![upload_intent(&[b'a'; 150], 0)])?;
        assert!(!plan.is_large_file());
        assert_eq!(part_lengths(&plan), vec![150]);
        assert_eq!(plan.total_length(), 150);
        Ok(())
    }

    #[test]
    fn test_two_part_split_at_twice_min() -> ApiResult<()> {
        // 恰好两倍最小分片的上传拆成两个最小分片
        let plan = planner().get_emerge_plan(vec![upload_intent(&[b'a'; 400], 0)])?;
        assert!(plan.is_large_file());
        assert_eq!(part_lengths(&plan), vec![200, 200]);
        Ok(())
    }

    #[test]
    fn test_recommended_buffering() -> ApiResult<()> {
        let planner = EmergePlanner::new(200, 300, 1000);
        let plan = planner.get_emerge_plan(vec![upload_intent(&[b'a'; 700], 0)])?;
        // 缓冲在 recommended + min 处切割出 recommended 大小的分片，余量并入末尾分片
        assert_eq!(part_lengths(&plan), vec![300, 400]);
        assert_eq!(plan.total_length(), 700);
        Ok(())
    }

    #[test]
    fn test_hole_is_rejected() {
        let result = planner().get_emerge_plan(vec![upload_intent(&[b'a'; 100], 0), upload_intent(&[b'b'; 100], 150)]);
        match result {
            Err(Error::InvalidArgument { message }) => assert_eq!(message, "Cannot emerge file with holes"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_protected_copy_is_kept_as_copy_parts() -> ApiResult<()> {
        // 不超过最大分片的拷贝保持为单个拷贝分片
        let plan = planner().get_emerge_plan(vec![copy_intent("remote", 600, 0)])?;
        assert!(!plan.is_large_file());
        assert_eq!(part_lengths(&plan), vec![600]);
        assert!(matches!(plan.parts()[0], EmergePartDefinition::Copy { .. }));
        assert_eq!(plan.plan_id()?, None);
        Ok(())
    }

    #[test]
    fn test_small_copy_is_demoted_to_subpart() -> ApiResult<()> {
        // 小于最小分片的拷贝与后续上传拼成一个分片，降级为下载后上传
        let plan = planner().get_emerge_plan(vec![
            copy_intent("remote", 100, 0),
            upload_intent(&[b'a'; 150], 100),
        ])?;
        assert!(!plan.is_large_file());
        assert_eq!(plan.total_length(), 250);
        match &plan.parts()[0] {
            EmergePartDefinition::Subparts { subparts } => {
                assert_eq!(subparts.len(), 2);
                assert!(matches!(subparts[0], UploadSubpart::Remote { .. }));
                assert!(matches!(subparts[1], UploadSubpart::Local { .. }));
            }
            other => panic!("unexpected part: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_upload_wins_over_unprotected_copy() -> ApiResult<()> {
        // 同一偏移上既有小拷贝又有上传时，字节来自本地上传
        let plan = planner().get_emerge_plan(vec![
            copy_intent("remote", 150, 0),
            upload_intent(&[b'a'; 150], 0),
        ])?;
        assert_eq!(plan.total_length(), 150);
        assert!(matches!(plan.parts()[0], EmergePartDefinition::Upload { .. }));
        Ok(())
    }

    #[test]
    fn test_protected_copy_wins_over_upload() -> ApiResult<()> {
        // 拷贝达到最小分片大小时优先拷贝，避免不必要的下载
        let plan = planner().get_emerge_plan(vec![
            copy_intent("remote", 600, 0),
            upload_intent(&[b'a'; 600], 0),
        ])?;
        assert_eq!(plan.total_length(), 600);
        assert!(plan
            .parts()
            .iter()
            .all(|part| matches!(part, EmergePartDefinition::Copy { .. })));
        Ok(())
    }

    #[test]
    fn test_copy_split_respects_max_part_size() -> ApiResult<()> {
        let planner = EmergePlanner::new(200, 200, 1000);
        let plan = planner.get_emerge_plan(vec![copy_intent("remote", 2600, 0)])?;
        let lengths = part_lengths(&plan);
        assert_eq!(lengths, vec![650, 650, 650, 650]);
        assert!(plan
            .parts()
            .iter()
            .all(|part| matches!(part, EmergePartDefinition::Copy { .. })));
        Ok(())
    }

    #[test]
    fn test_plan_length_conservation_and_bounds() -> ApiResult<()> {
        let planner = planner();
        let plan = planner.get_emerge_plan(vec![
            upload_intent(&[b'a'; 450], 0),
            upload_intent(&[b'b'; 317], 450),
            upload_intent(&[b'c'; 633], 767),
        ])?;
        assert_eq!(plan.total_length(), 1400);
        let lengths = part_lengths(&plan);
        for (index, length) in lengths.iter().enumerate() {
            if index + 1 < lengths.len() {
                assert!(*length >= planner.min_part_size());
            }
            assert!(*length <= planner.max_part_size());
        }
        Ok(())
    }

    #[test]
    fn test_plan_id_is_deterministic() -> ApiResult<()> {
        let source = Arc::new(UploadSourceBytes::new(vec![b'x'; 500]));
        let plan_a = planner().get_emerge_plan(vec![WriteIntent::upload(source.to_owned(), 0)])?;
        let plan_b = planner().get_emerge_plan(vec![WriteIntent::upload(source, 0)])?;
        let id_a = plan_a.plan_id()?.unwrap();
        let id_b = plan_b.plan_id()?.unwrap();
        assert_eq!(id_a, id_b);
        assert_eq!(id_a.len(), 40);

        let lengths_a = part_lengths(&plan_a);
        let lengths_b = part_lengths(&plan_b);
        assert_eq!(lengths_a, lengths_b);
        Ok(())
    }

    #[test]
    fn test_zero_length_upload_yields_single_empty_part() -> ApiResult<()> {
        let plan = planner().get_emerge_plan(vec![upload_intent(&[], 0)])?;
        assert!(!plan.is_large_file());
        assert_eq!(plan.total_length(), 0);
        assert_eq!(plan.parts().len(), 1);
        Ok(())
    }
}

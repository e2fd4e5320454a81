use super::{
    action::SyncAction,
    error::{SyncError, SyncResult},
    folder::SyncFolder,
    path::SyncPath,
};

const ONE_DAY_IN_MS: u64 = 24 * 60 * 60 * 1000;

/// 文件版本的比较方式
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompareVersionMode {
    /// 只按名字比较，目标已存在就不再传输
    None,
    /// 按修改时间比较
    ModTime,
    /// 按文件大小比较
    Size,
}

/// 目标端文件比来源端新时的处理方式
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NewerFileSyncMode {
    /// 跳过该文件
    Skip,
    /// 用来源端（更旧的）文件覆盖
    Replace,
    /// 报不可恢复的错误，使同步失败
    RaiseError,
}

/// 旧版本的保留方式
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum KeepOrDeleteMode {
    /// 删除目标端多余的文件与旧版本
    Delete,
    /// 保留指定天数内可见过的版本，之后删除
    KeepBeforeDelete {
        /// 保留天数
        keep_days: u64,
    },
    /// 不做任何删除
    NoDelete,
}

/// 同步策略配置
#[derive(Debug, Copy, Clone)]
pub struct SyncPolicyConfig {
    /// 比较方式
    pub compare_version_mode: CompareVersionMode,
    /// 比较容差，毫秒或字节
    pub compare_threshold: u64,
    /// 目标端更新时的处理方式
    pub newer_file_mode: NewerFileSyncMode,
    /// 旧版本保留方式
    pub keep_mode: KeepOrDeleteMode,
}

impl Default for SyncPolicyConfig {
    fn default() -> Self {
        Self {
            compare_version_mode: CompareVersionMode::ModTime,
            compare_threshold: 0,
            newer_file_mode: NewerFileSyncMode::RaiseError,
            keep_mode: KeepOrDeleteMode::NoDelete,
        }
    }
}

/// 判断是否需要把来源端文件传输到目标端
///
/// 目标端不存在时总是传输；两侧都存在时按配置的方式比较。
/// 目标端更新且配置为报错时返回 [`SyncError::DestFileNewer`]。
pub fn should_transfer(
    source_path: Option<&SyncPath>,
    dest_path: Option<&SyncPath>,
    config: &SyncPolicyConfig,
) -> SyncResult<bool> {
    let Some(source_path) = source_path else {
        return Ok(false);
    };
    if !source_path.is_visible() {
        return Ok(false);
    }
    let Some(dest_path) = dest_path else {
        return Ok(true);
    };
    if !dest_path.is_visible() {
        return Ok(true);
    }
    files_are_different(source_path, dest_path, config)
}

fn files_are_different(source_path: &SyncPath, dest_path: &SyncPath, config: &SyncPolicyConfig) -> SyncResult<bool> {
    match config.compare_version_mode {
        CompareVersionMode::None => Ok(false),
        CompareVersionMode::ModTime => {
            let source_mod_time = source_path.mod_time_millis();
            let dest_mod_time = dest_path.mod_time_millis();
            let diff = source_mod_time.abs_diff(dest_mod_time);
            if diff <= config.compare_threshold {
                return Ok(false);
            }
            if dest_mod_time < source_mod_time {
                return Ok(true);
            }
            // 来源端更旧
            match config.newer_file_mode {
                NewerFileSyncMode::Replace => Ok(true),
                NewerFileSyncMode::Skip => Ok(false),
                NewerFileSyncMode::RaiseError => Err(SyncError::DestFileNewer {
                    file_name: dest_path.relative_path().to_owned(),
                }),
            }
        }
        CompareVersionMode::Size => {
            let diff = source_path.size().abs_diff(dest_path.size());
            Ok(diff > config.compare_threshold)
        }
    }
}

/// 产出一对路径对应的全部动作
///
/// 先是可能的传输动作，然后是按保留方式产生的隐藏与删除动作。
pub fn make_actions_for_pair(
    source_path: Option<&SyncPath>,
    dest_path: Option<&SyncPath>,
    source_folder: &SyncFolder,
    dest_folder: &SyncFolder,
    config: &SyncPolicyConfig,
    now_millis: u64,
) -> SyncResult<Vec<SyncAction>> {
    let mut actions = Vec::new();
    let transferred = should_transfer(source_path, dest_path, config)?;
    if transferred {
        let source_path = source_path.expect("transfer without source");
        actions.push(make_transfer_action(source_path, source_folder, dest_folder)?);
    }

    match (dest_folder, config.keep_mode) {
        (SyncFolder::B2(_), KeepOrDeleteMode::Delete) => {
            actions.extend(make_b2_delete_actions(source_path, dest_path, transferred));
        }
        (SyncFolder::B2(_), KeepOrDeleteMode::KeepBeforeDelete { keep_days }) => {
            actions.extend(make_b2_keep_days_actions(
                source_path,
                dest_path,
                transferred,
                keep_days,
                now_millis,
            ));
        }
        (SyncFolder::Local(local), KeepOrDeleteMode::Delete) => {
            // 本地没有版本概念，来源端消失即删除
            if let Some(dest_path) = dest_path {
                let source_gone = source_path.map_or(true, |source_path| !source_path.is_visible());
                if source_gone {
                    actions.push(SyncAction::LocalDelete {
                        relative_path: dest_path.relative_path().to_owned(),
                        local_path: local.make_full_path(dest_path.relative_path())?,
                    });
                }
            }
        }
        _ => {}
    }
    Ok(actions)
}

fn make_transfer_action(
    source_path: &SyncPath,
    source_folder: &SyncFolder,
    dest_folder: &SyncFolder,
) -> SyncResult<SyncAction> {
    let relative_path = source_path.relative_path();
    match (source_folder, dest_folder, source_path) {
        (
            SyncFolder::Local(_),
            SyncFolder::B2(dest),
            SyncPath::Local {
                absolute_path,
                mod_time_millis,
                size,
                ..
            },
        ) => Ok(SyncAction::Upload {
            relative_path: relative_path.to_owned(),
            local_path: absolute_path.to_owned(),
            b2_file_name: dest.make_full_b2_path(relative_path),
            mod_time_millis: *mod_time_millis,
            size: *size,
        }),
        (SyncFolder::B2(_), SyncFolder::Local(dest), SyncPath::B2 { versions, .. }) => Ok(SyncAction::Download {
            relative_path: relative_path.to_owned(),
            file_version: versions.first().expect("b2 path without versions").to_owned(),
            local_path: dest.make_full_path(relative_path)?,
        }),
        (SyncFolder::B2(_), SyncFolder::B2(dest), SyncPath::B2 { versions, .. }) => Ok(SyncAction::Copy {
            relative_path: relative_path.to_owned(),
            source_version: versions.first().expect("b2 path without versions").to_owned(),
            dest_b2_file_name: dest.make_full_b2_path(relative_path),
            dest_bucket_id: dest.bucket_id().to_owned(),
        }),
        _ => Err(SyncError::InvalidArgument {
            message: "sync between two local folders is not supported".to_owned(),
        }),
    }
}

fn make_b2_delete_note(version: &b2_apis::FileVersion, index: usize, transferred: bool) -> String {
    if version.action == "hide" {
        "(hide marker)".to_owned()
    } else if transferred || index > 0 {
        "(old version)".to_owned()
    } else {
        String::new()
    }
}

/// 产出删除目标端多余版本的动作
///
/// 来源端仍然存在且未重新传输时保留最新版本，其余全部删除。
pub fn make_b2_delete_actions(
    source_path: Option<&SyncPath>,
    dest_path: Option<&SyncPath>,
    transferred: bool,
) -> Vec<SyncAction> {
    let Some(dest_path) = dest_path else {
        return Vec::new();
    };
    let mut actions = Vec::new();
    for (index, version) in dest_path.all_versions().iter().enumerate() {
        let keep = index == 0 && source_path.is_some() && !transferred;
        if !keep {
            actions.push(SyncAction::Delete {
                relative_path: dest_path.relative_path().to_owned(),
                b2_file_name: version.file_name.to_owned(),
                file_id: version.file_id.to_owned(),
                note: make_b2_delete_note(version, index, transferred),
            });
        }
    }
    actions
}

/// 产出按保留天数隐藏或删除目标端版本的动作
///
/// 在保留窗口内可见过的版本必须保留：一个版本何时开始不可见，
/// 取决于它之后的隐藏标记或更新版本的时间，因此只要上一个版本
/// 的年龄超过保留天数，更旧的版本就都可以删除。
/// 对刚刚从来源端消失的文件，最多产出一个隐藏动作。
pub fn make_b2_keep_days_actions(
    source_path: Option<&SyncPath>,
    dest_path: Option<&SyncPath>,
    transferred: bool,
    keep_days: u64,
    now_millis: u64,
) -> Vec<SyncAction> {
    let Some(dest_path) = dest_path else {
        return Vec::new();
    };
    let mut actions = Vec::new();
    let mut deleting = false;
    for (index, version) in dest_path.all_versions().iter().enumerate() {
        // 版本大体上按时间从新到旧，但用户指定的源修改时间可能乱序；
        // 一旦某个乱序的版本老到触发删除，它之后的版本也会一并删除
        let age_days = now_millis.saturating_sub(version.mod_time_millis()) / ONE_DAY_IN_MS;

        if index == 0 && source_path.is_none() && version.action == "upload" {
            actions.push(SyncAction::Hide {
                relative_path: dest_path.relative_path().to_owned(),
                b2_file_name: version.file_name.to_owned(),
            });
        }

        if version.action == "hide" && keep_days < age_days {
            deleting = true;
        }

        if deleting {
            actions.push(SyncAction::Delete {
                relative_path: dest_path.relative_path().to_owned(),
                b2_file_name: version.file_name.to_owned(),
                file_id: version.file_id.to_owned(),
                note: make_b2_delete_note(version, index, transferred),
            });
        }

        if keep_days < age_days {
            deleting = true;
        }
    }
    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use b2_apis::FileVersion;

    fn version(file_id: &str, action: &str, mod_time_millis: u64) -> FileVersion {
        serde_json::from_value(serde_json::json!({
            "fileId": file_id,
            "fileName": "a.txt",
            "action": action,
            "uploadTimestamp": mod_time_millis,
            "contentLength": 10u64,
        }))
        .unwrap()
    }

    fn b2_path(versions: Vec<FileVersion>) -> SyncPath {
        SyncPath::B2 {
            relative_path: "a.txt".to_owned(),
            versions,
        }
    }

    fn local_path(mod_time_millis: u64) -> SyncPath {
        SyncPath::Local {
            absolute_path: "/src/a.txt".into(),
            relative_path: "a.txt".to_owned(),
            mod_time_millis,
            size: 10,
        }
    }

    #[test]
    fn test_newer_dest_raises_error() {
        let config = SyncPolicyConfig {
            newer_file_mode: NewerFileSyncMode::RaiseError,
            ..Default::default()
        };
        let source = local_path(100);
        let dest = b2_path(vec![version("v1", "upload", 200)]);
        let result = should_transfer(Some(&source), Some(&dest), &config);
        assert!(matches!(result, Err(SyncError::DestFileNewer { .. })));
    }

    #[test]
    fn test_newer_dest_replace_and_skip() -> SyncResult<()> {
        let source = local_path(100);
        let dest = b2_path(vec![version("v1", "upload", 200)]);

        let replace = SyncPolicyConfig {
            newer_file_mode: NewerFileSyncMode::Replace,
            ..Default::default()
        };
        assert!(should_transfer(Some(&source), Some(&dest), &replace)?);

        let skip = SyncPolicyConfig {
            newer_file_mode: NewerFileSyncMode::Skip,
            ..Default::default()
        };
        assert!(!should_transfer(Some(&source), Some(&dest), &skip)?);
        Ok(())
    }

    #[test]
    fn test_compare_modes() -> SyncResult<()> {
        let source = local_path(300);
        let dest = b2_path(vec![version("v1", "upload", 100)]);

        let by_mod_time = SyncPolicyConfig::default();
        assert!(should_transfer(Some(&source), Some(&dest), &by_mod_time)?);

        let with_threshold = SyncPolicyConfig {
            compare_threshold: 500,
            ..Default::default()
        };
        assert!(!should_transfer(Some(&source), Some(&dest), &with_threshold)?);

        let by_name = SyncPolicyConfig {
            compare_version_mode: CompareVersionMode::None,
            ..Default::default()
        };
        assert!(!should_transfer(Some(&source), Some(&dest), &by_name)?);
        assert!(should_transfer(Some(&source), None, &by_name)?);
        Ok(())
    }

    #[test]
    fn test_delete_actions_keep_latest_when_not_transferred() {
        let dest = b2_path(vec![version("v2", "upload", 200), version("v1", "upload", 100)]);
        let source = local_path(200);

        let actions = make_b2_delete_actions(Some(&source), Some(&dest), false);
        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0], SyncAction::Delete { file_id, .. } if file_id == "v1"));

        // 重新传输后旧的最新版本也要删除
        let actions = make_b2_delete_actions(Some(&source), Some(&dest), true);
        assert_eq!(actions.len(), 2);

        // 来源端消失时全部版本删除
        let actions = make_b2_delete_actions(None, Some(&dest), false);
        assert_eq!(actions.len(), 2);
    }

    #[test]
    fn test_keep_days_hides_current_and_deletes_only_old_versions() {
        let day = ONE_DAY_IN_MS;
        let now = 100 * day;
        // 版本时间：现在，两天前，四天前；保留一天
        let dest = b2_path(vec![
            version("v3", "upload", now),
            version("v2", "upload", now - 2 * day),
            version("v1", "upload", now - 4 * day),
        ]);
        let actions = make_b2_keep_days_actions(None, Some(&dest), false, 1, now);

        // 来源端不存在，最新版本是可见的，先隐藏
        assert!(matches!(&actions[0], SyncAction::Hide { .. }));
        // 两天前的版本在一天前仍然可见（它直到最新版本出现才失效），保留；
        // 四天前的版本在保留窗口前就已经不可见，删除
        let deletes = actions
            .iter()
            .filter_map(|action| match action {
                SyncAction::Delete { file_id, .. } => Some(file_id.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(deletes, vec!["v1"]);
        assert_eq!(actions.len(), 2);
    }

    #[test]
    fn test_keep_days_preserves_hide_markers_in_window() {
        let day = ONE_DAY_IN_MS;
        let now = 100 * day;
        // 半天前被隐藏的文件：隐藏标记保证它在保留窗口内"重新出现"过，
        // 隐藏标记与它遮住的版本都必须保留
        let dest = b2_path(vec![
            version("hide-marker", "hide", now - day / 2),
            version("v1", "upload", now - 2 * day),
        ]);
        let actions = make_b2_keep_days_actions(None, Some(&dest), false, 1, now);
        assert!(actions.is_empty());

        // 隐藏标记本身老于保留窗口时，从它开始全部删除
        let dest = b2_path(vec![
            version("hide-marker", "hide", now - 2 * day),
            version("v1", "upload", now - 3 * day),
        ]);
        let actions = make_b2_keep_days_actions(None, Some(&dest), false, 1, now);
        let deletes = actions
            .iter()
            .filter_map(|action| match action {
                SyncAction::Delete { file_id, .. } => Some(file_id.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(deletes, vec!["hide-marker", "v1"]);
    }
}

//! 通用批量执行器
//!
//! 按计划顺序逐个执行动作，每个动作完成后才开始下一个。
//! 没有原子性也没有回滚：失败时已执行的动作保留，后续动作不再执行。

use crate::connector::{Connector, Method};
use crate::error::{BridgeError, Result};
use crate::{ActionKind, BatchAction, ConnectorSession};
use tracing::{debug, warn};

/// 批量执行结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// 已执行的动作（按执行顺序）
    pub completed: Vec<BatchAction>,
    /// 因类型未知或连接器不支持而跳过的动作下标
    pub skipped: Vec<usize>,
}

/// 动作标签对应的连接器方法
pub fn action_method(kind: &ActionKind) -> Option<Method> {
    match kind {
        ActionKind::Unlink => Some(Method::Unlink),
        ActionKind::Rmdir => Some(Method::Rmdir),
        ActionKind::Rename => Some(Method::Rename),
        ActionKind::Mkdir => Some(Method::Mkdir),
        ActionKind::WriteFile => Some(Method::WriteFile),
        ActionKind::Unknown(_) => None,
    }
}

/// 对单个连接器会话执行批量计划
pub async fn execute<C>(
    connector: &C,
    session: &mut ConnectorSession,
    plan: &[BatchAction],
) -> Result<BatchReport>
where
    C: Connector + ?Sized,
{
    let mut report = BatchReport::default();

    for (index, action) in plan.iter().enumerate() {
        let supported = action_method(&action.name).filter(|m| connector.supports(*m));
        if supported.is_none() {
            warn!(
                "跳过不支持的批量动作: connector={}, index={}, action={}",
                connector.name(),
                index,
                action
            );
            report.skipped.push(index);
            continue;
        }

        debug!("执行批量动作 #{}: {}", index, action);
        if let Err(e) = apply(connector, session, action).await {
            return Err(BridgeError::batch(
                index,
                action.clone(),
                report.completed,
                e,
            ));
        }
        report.completed.push(action.clone());
    }

    Ok(report)
}

/// 把单个动作翻译为连接器调用
pub async fn apply<C>(connector: &C, session: &mut ConnectorSession, action: &BatchAction) -> Result<()>
where
    C: Connector + ?Sized,
{
    match &action.name {
        ActionKind::Unlink => connector.unlink(session, &action.path).await,
        ActionKind::Rmdir => connector.rmdir(session, &action.path).await,
        ActionKind::Mkdir => connector.mkdir(session, &action.path).await,
        ActionKind::Rename => {
            let dest = action.require_destination()?;
            connector.rename(session, &action.path, dest).await
        }
        ActionKind::WriteFile => {
            let content = action.require_content()?;
            connector.write_file(session, &action.path, content).await
        }
        ActionKind::Unknown(tag) => Err(BridgeError::NotSupported(format!("批量动作 {}", tag))),
    }
}

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub id: u64,
    pub message: String,
    pub level: NotificationLevel,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl Notification {
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    pub fn time_remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// 短暂显示、可手动关闭的用户通知。实体变更失败时由会话推送。
#[derive(Debug)]
pub struct NotificationCenter {
    notifications: Vec<Notification>,
    default_duration: Duration,
    next_id: u64,
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::with_default_duration(Duration::from_secs(5))
    }
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_duration(default_duration: Duration) -> Self {
        Self {
            notifications: Vec::new(),
            default_duration,
            next_id: 0,
        }
    }

    pub fn notify(&mut self, message: impl Into<String>, level: NotificationLevel) -> u64 {
        self.notify_for(message, level, self.default_duration)
    }

    pub fn notify_for(
        &mut self,
        message: impl Into<String>,
        level: NotificationLevel,
        duration: Duration,
    ) -> u64 {
        self.prune_expired();
        self.next_id += 1;
        let now = Instant::now();
        self.notifications.push(Notification {
            id: self.next_id,
            message: message.into(),
            level,
            created_at: now,
            expires_at: now + duration,
        });
        self.next_id
    }

    pub fn error(&mut self, message: impl Into<String>) -> u64 {
        self.notify(message, NotificationLevel::Error)
    }

    /// 用户关闭通知；返回是否存在该通知。
    pub fn dismiss(&mut self, id: u64) -> bool {
        let before = self.notifications.len();
        self.notifications.retain(|notification| notification.id != id);
        before != self.notifications.len()
    }

    /// 未过期的通知，最新的在后。
    pub fn active(&self) -> impl Iterator<Item = &Notification> + '_ {
        let now = Instant::now();
        self.notifications
            .iter()
            .filter(move |notification| !notification.is_expired_at(now))
    }

    pub fn latest(&self) -> Option<&Notification> {
        self.active().last()
    }

    pub fn prune_expired(&mut self) {
        let now = Instant::now();
        self.notifications
            .retain(|notification| !notification.is_expired_at(now));
    }

    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifications_can_be_dismissed_by_id() {
        let mut center = NotificationCenter::new();
        let first = center.error("更新实体失败");
        let second = center.notify("已复制", NotificationLevel::Info);
        assert_ne!(first, second);
        assert_eq!(center.active().count(), 2);
        assert!(center.dismiss(first));
        assert!(!center.dismiss(first));
        assert_eq!(center.latest().map(|n| n.id), Some(second));
    }

    #[test]
    fn expired_notifications_are_hidden_and_pruned() {
        let mut center = NotificationCenter::with_default_duration(Duration::ZERO);
        center.error("删除实体失败");
        assert_eq!(center.active().count(), 0);
        assert_eq!(center.len(), 1);
        center.prune_expired();
        assert!(center.is_empty());

        center.notify_for("保留", NotificationLevel::Warning, Duration::from_secs(60));
        assert!(center.latest().is_some_and(|n| n.time_remaining() > Duration::ZERO));
    }

    #[test]
    fn new_notifications_drop_expired_ones() {
        let mut center = NotificationCenter::with_default_duration(Duration::ZERO);
        center.error("更新实体失败");
        center.error("删除实体失败");
        assert_eq!(center.len(), 1);

        let kept = center.notify_for("已复制", NotificationLevel::Info, Duration::from_secs(60));
        assert_eq!(center.len(), 1);
        assert_eq!(center.latest().map(|n| n.id), Some(kept));
    }
}

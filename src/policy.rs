// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 访问策略模块
//!
//! 代理在转发请求之前需要做出的全部策略判断：
//! - 用户屏蔽：按客户端 IP 精确匹配。
//! - 网址屏蔽：按请求目标地址精确匹配。
//! - 重定向：按子串包含关系改写目标地址与主机名。
//!
//! 策略表在启动时从配置文件载入，之后只读，因此可以在所有连接之间无锁共享。

use std::collections::{BTreeMap, HashSet};

use serde_derive::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Policy {
    #[serde(default)]
    forbidden_sites: HashSet<String>,
    #[serde(default)]
    forbidden_users: HashSet<String>,
    /// 主机名子串 -> 替换后的主机名
    #[serde(default)]
    host_redirects: BTreeMap<String, String>,
    /// 访问地址子串 -> 替换后的访问地址
    #[serde(default)]
    address_redirects: BTreeMap<String, String>,
}

impl Policy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forbid_site(mut self, site: &str) -> Self {
        self.forbidden_sites.insert(site.to_string());
        self
    }

    pub fn forbid_user(mut self, address: &str) -> Self {
        self.forbidden_users.insert(address.to_string());
        self
    }

    pub fn redirect_host_to(mut self, keyword: &str, host: &str) -> Self {
        self.host_redirects.insert(keyword.to_string(), host.to_string());
        self
    }

    pub fn redirect_address_to(mut self, keyword: &str, address: &str) -> Self {
        self.address_redirects
            .insert(keyword.to_string(), address.to_string());
        self
    }
}

impl Policy {
    /// 客户端地址是否被屏蔽
    pub fn is_user_banned(&self, client_address: &str) -> bool {
        self.forbidden_users.contains(client_address)
    }

    /// 目标地址是否被屏蔽。只做精确匹配，不做子串匹配
    pub fn is_site_forbidden(&self, target: &str) -> bool {
        self.forbidden_sites.contains(target)
    }

    /// 查找目标地址的重定向结果。
    ///
    /// 第一个作为子串出现在 `target` 中的键生效，返回该键映射的新地址。
    /// 键按字典序遍历，但配置不应依赖多个键同时命中时的先后顺序。
    pub fn redirect_address(&self, target: &str) -> Option<&str> {
        first_match(&self.address_redirects, target)
    }

    /// 查找主机名的重定向结果，匹配规则与 [`Policy::redirect_address`] 相同
    pub fn redirect_host(&self, host: &str) -> Option<&str> {
        first_match(&self.host_redirects, host)
    }

    pub fn is_empty(&self) -> bool {
        self.forbidden_sites.is_empty()
            && self.forbidden_users.is_empty()
            && self.host_redirects.is_empty()
            && self.address_redirects.is_empty()
    }
}

fn first_match<'a>(table: &'a BTreeMap<String, String>, value: &str) -> Option<&'a str> {
    table
        .iter()
        .find(|(keyword, _)| value.contains(keyword.as_str()))
        .map(|(_, replacement)| replacement.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_policy_allows_everything() {
        let policy = Policy::new();
        assert!(policy.is_empty());
        assert!(!policy.is_user_banned("127.0.0.1"));
        assert!(!policy.is_site_forbidden("http://example.com/"));
        assert_eq!(policy.redirect_address("http://example.com/"), None);
        assert_eq!(policy.redirect_host("example.com"), None);
    }

    #[test]
    fn test_user_ban_is_exact() {
        let policy = Policy::new().forbid_user("10.0.0.1");
        assert!(policy.is_user_banned("10.0.0.1"));
        assert!(!policy.is_user_banned("10.0.0.10"));
    }

    #[test]
    fn test_site_ban_is_exact() {
        let policy = Policy::new().forbid_site("http://jwts.hit.edu.cn/");
        assert!(policy.is_site_forbidden("http://jwts.hit.edu.cn/"));
        assert!(!policy.is_site_forbidden("http://jwts.hit.edu.cn/index.html"));
        assert!(!policy.is_site_forbidden("jwts.hit.edu.cn"));
    }

    #[test]
    fn test_address_redirect_by_substring() {
        let policy =
            Policy::new().redirect_address_to("jwes.hit.edu.cn", "http://www.example.com/");
        assert_eq!(
            policy.redirect_address("http://jwes.hit.edu.cn/login?next=1"),
            Some("http://www.example.com/")
        );
        assert_eq!(policy.redirect_address("http://other.edu.cn/"), None);
    }

    #[test]
    fn test_host_redirect_uses_mapped_value_of_matching_key() {
        let policy = Policy::new().redirect_host_to("jwes.hit.edu.cn", "www.example.com");
        assert_eq!(
            policy.redirect_host("jwes.hit.edu.cn"),
            Some("www.example.com")
        );
        assert_eq!(
            policy.redirect_host("static.jwes.hit.edu.cn"),
            Some("www.example.com")
        );
        assert_eq!(policy.redirect_host("hit.edu.cn"), None);
    }

    #[test]
    fn test_deserialize_from_toml() {
        let text = r#"
            forbidden_sites = ["http://banned.test/"]
            forbidden_users = ["192.168.1.7"]

            [host_redirects]
            "old.test" = "new.test"

            [address_redirects]
            "old.test" = "http://new.test/"
        "#;
        let policy: Policy = toml::from_str(text).unwrap();
        assert!(policy.is_site_forbidden("http://banned.test/"));
        assert!(policy.is_user_banned("192.168.1.7"));
        assert_eq!(policy.redirect_host("old.test"), Some("new.test"));
        assert_eq!(
            policy.redirect_address("http://old.test/a"),
            Some("http://new.test/")
        );
    }
}

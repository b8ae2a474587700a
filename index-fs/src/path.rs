//! # 路径解析
//!
//! 纯字符串运算，不访问存储设备。分隔符恒为`/`，
//! 连续的分隔符视为一个，末尾的分隔符不产生空的路径项。

use alloc::string::String;
use alloc::vec::Vec;

use crate::{Error, PATH_MAX, Result};

const SEPARATOR: char = '/';

/// 逐项遍历路径的游标
#[derive(Debug, Clone)]
pub struct Components<'a> {
    rest: &'a str,
}

impl<'a> Components<'a> {
    #[inline]
    pub fn new(path: &'a str) -> Self {
        Self { rest: path }
    }

    /// 是否还有下一项，不消耗游标
    #[inline]
    pub fn has_next(&self) -> bool {
        !self.rest.trim_start_matches(SEPARATOR).is_empty()
    }
}

impl<'a> Iterator for Components<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        // 跳过所有连续的`/`
        let rest = self.rest.trim_start_matches(SEPARATOR);
        if rest.is_empty() {
            self.rest = rest;
            return None;
        }

        let end = rest.find(SEPARATOR).unwrap_or(rest.len());
        let (component, rest) = rest.split_at(end);
        self.rest = rest;
        Some(component)
    }
}

#[inline]
pub fn is_absolute(path: &str) -> bool {
    path.starts_with(SEPARATOR)
}

/// 不含任何路径项的绝对路径，即根目录
#[inline]
pub fn is_root(absolute: &str) -> bool {
    is_absolute(absolute) && !Components::new(absolute).has_next()
}

/// 返回绝对路径。
///
/// 绝对路径原样返回；相对路径接在 `cwd` 之后，二者之间恰有一个`/`。
///
/// # 参数
///
/// `cwd`: 调用者的当前目录，为绝对路径。
pub fn to_absolute(path: &str, cwd: &str) -> Result<String> {
    let mut absolute = String::with_capacity(PATH_MAX);
    if is_absolute(path) {
        absolute.push_str(path);
    } else {
        absolute.push_str(cwd);
        if !absolute.ends_with(SEPARATOR) {
            absolute.push(SEPARATOR);
        }
        absolute.push_str(path);
    }

    if absolute.len() > PATH_MAX {
        return Err(Error::PathTooLong);
    }
    Ok(absolute)
}

/// 返回路径的`(父目录, 文件名)`。
///
/// 父目录是绝对路径中最后一个`/`及其之前的部分，文件名是其后的部分；
/// 根目录的父目录是其自身，文件名为空。
pub fn split_parent_and_leaf(path: &str, cwd: &str) -> Result<(String, String)> {
    let mut absolute = to_absolute(path, cwd)?;
    let leaf = absolute.split_off(leaf_start(&absolute));
    Ok((absolute, leaf))
}

/// 返回路径的文件名。
///
/// 途中求出的绝对路径写入 `absolute`，调用者据此判断根目录或截取父目录，
/// 无需再算一遍。
pub fn leaf_name(path: &str, cwd: &str, absolute: &mut String) -> Result<String> {
    *absolute = to_absolute(path, cwd)?;
    Ok(String::from(&absolute[leaf_start(absolute)..]))
}

/// 返回不以`/`结束（根目录除外）、不包含`.`与`..`的绝对路径。
///
/// 仅做字面上的折叠，`..` 越过根目录时停在根目录。
pub fn normalize(absolute: &str) -> String {
    debug_assert!(is_absolute(absolute));

    let mut cmps = Vec::new();
    for cmp in Components::new(absolute) {
        match cmp {
            ".." => {
                cmps.pop();
            }
            "." => (),
            s => cmps.push(s),
        }
    }

    if cmps.is_empty() {
        return String::from("/");
    }
    cmps.insert(0, ""); // 在接下来的拼接中代表根目录
    cmps.join("/")
}

#[inline]
fn leaf_start(absolute: &str) -> usize {
    absolute.rfind(SEPARATOR).map_or(0, |i| i + 1)
}

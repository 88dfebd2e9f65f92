//! User and group tables.
//!
//! Imported once at open when `import_users` is enabled. Live captures parse
//! the account databases; file captures load the user/group blocks recorded
//! in the capture. Lookups are O(1).

use std::collections::HashMap;
use std::fs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub uid: u32,
    pub name: String,
    pub home: String,
    pub shell: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub gid: u32,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct UserDb {
    users: HashMap<u32, UserInfo>,
    groups: HashMap<u32, GroupInfo>,
}

impl UserDb {
    pub fn new() -> Self {
        UserDb::default()
    }

    /// Parse /etc/passwd and /etc/group. Unreadable files leave the tables
    /// empty rather than failing the capture.
    pub fn import_from_os(&mut self) {
        if let Ok(passwd) = fs::read_to_string("/etc/passwd") {
            for line in passwd.lines() {
                if let Some(user) = parse_passwd_line(line) {
                    self.users.insert(user.uid, user);
                }
            }
        }
        if let Ok(group) = fs::read_to_string("/etc/group") {
            for line in group.lines() {
                if let Some(grp) = parse_group_line(line) {
                    self.groups.insert(grp.gid, grp);
                }
            }
        }
    }

    pub fn add_user(&mut self, user: UserInfo) {
        self.users.insert(user.uid, user);
    }

    pub fn add_group(&mut self, group: GroupInfo) {
        self.groups.insert(group.gid, group);
    }

    pub fn user(&self, uid: u32) -> Option<&UserInfo> {
        self.users.get(&uid)
    }

    pub fn group(&self, gid: u32) -> Option<&GroupInfo> {
        self.groups.get(&gid)
    }

    pub fn users(&self) -> &HashMap<u32, UserInfo> {
        &self.users
    }

    pub fn groups(&self) -> &HashMap<u32, GroupInfo> {
        &self.groups
    }

    pub fn clear(&mut self) {
        self.users.clear();
        self.groups.clear();
    }
}

fn parse_passwd_line(line: &str) -> Option<UserInfo> {
    // name:passwd:uid:gid:gecos:home:shell
    let mut fields = line.split(':');
    let name = fields.next()?.to_string();
    let _passwd = fields.next()?;
    let uid: u32 = fields.next()?.parse().ok()?;
    let _gid = fields.next()?;
    let _gecos = fields.next()?;
    let home = fields.next()?.to_string();
    let shell = fields.next().unwrap_or("").to_string();
    Some(UserInfo {
        uid,
        name,
        home,
        shell,
    })
}

fn parse_group_line(line: &str) -> Option<GroupInfo> {
    // name:passwd:gid:members
    let mut fields = line.split(':');
    let name = fields.next()?.to_string();
    let _passwd = fields.next()?;
    let gid: u32 = fields.next()?.parse().ok()?;
    Some(GroupInfo { gid, name })
}

//! People who can be enrolled: students (with a class) and teachers.

use anyhow::Result;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::Database;
use crate::error::RollcallError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RollcallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "teacher" => Ok(Role::Teacher),
            other => Err(RollcallError::InvalidRole(other.to_string())),
        }
    }
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: RollcallError| FromSqlError::Other(Box::new(e)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub role: Role,
    pub class_name: Option<String>,
}

fn person_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Person> {
    Ok(Person {
        id: row.get(0)?,
        name: row.get(1)?,
        role: row.get(2)?,
        class_name: row.get(3)?,
    })
}

impl Database {
    pub fn create_person(&self, name: &str, role: Role, class_name: Option<&str>) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO people (name, role, class_name) VALUES (?, ?, ?)",
            params![name.trim(), role, class_name],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Find a person by name (case-insensitive), role and class
    pub fn find_person(&self, name: &str, role: Role, class_name: Option<&str>) -> Result<Option<Person>> {
        let person = self
            .conn
            .query_row(
                r#"
                SELECT id, name, role, class_name
                FROM people
                WHERE LOWER(name) = LOWER(?1) AND role = ?2 AND class_name IS ?3
                ORDER BY id
                LIMIT 1
                "#,
                params![name.trim(), role, class_name],
                person_from_row,
            )
            .optional()?;
        Ok(person)
    }

    /// Find an existing person, or create a new one
    pub fn find_or_create_person(&self, name: &str, role: Role, class_name: Option<&str>) -> Result<i64> {
        match self.find_person(name, role, class_name)? {
            Some(person) => Ok(person.id),
            None => self.create_person(name, role, class_name),
        }
    }

    pub fn get_person(&self, person_id: i64) -> Result<Option<Person>> {
        let person = self
            .conn
            .query_row(
                "SELECT id, name, role, class_name FROM people WHERE id = ?",
                [person_id],
                person_from_row,
            )
            .optional()?;
        Ok(person)
    }

    /// People of `role` with no active face embedding, by name.
    pub fn people_needing_enrollment(&self, role: Role) -> Result<Vec<Person>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT p.id, p.name, p.role, p.class_name
            FROM people p
            WHERE p.role = ?
              AND NOT EXISTS (
                  SELECT 1 FROM face_embeddings fe
                  WHERE fe.person_id = p.id AND fe.is_active = 1
              )
            ORDER BY p.name COLLATE NOCASE, p.id
            "#,
        )?;

        let people = stmt
            .query_map([role], person_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(people)
    }

    pub fn count_people(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM people", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    #[test]
    fn test_role_parse_and_display() {
        assert_eq!("Student".parse::<Role>().unwrap(), Role::Student);
        assert_eq!(" teacher ".parse::<Role>().unwrap(), Role::Teacher);
        assert_eq!(Role::Teacher.to_string(), "teacher");
        assert!(matches!("janitor".parse::<Role>(), Err(RollcallError::InvalidRole(_))));
    }

    #[test]
    fn test_find_or_create_is_case_insensitive() {
        let db = test_db();
        let id = db.find_or_create_person("Ada Lovelace", Role::Student, Some("5A")).unwrap();
        let again = db.find_or_create_person("ada lovelace", Role::Student, Some("5A")).unwrap();
        assert_eq!(id, again);
        assert_eq!(db.count_people().unwrap(), 1);
    }

    #[test]
    fn test_same_name_different_class_or_role() {
        let db = test_db();
        let a = db.find_or_create_person("Sam", Role::Student, Some("5A")).unwrap();
        let b = db.find_or_create_person("Sam", Role::Student, Some("6B")).unwrap();
        let c = db.find_or_create_person("Sam", Role::Teacher, None).unwrap();
        let c2 = db.find_or_create_person("Sam", Role::Teacher, None).unwrap();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(c, c2);
    }

    #[test]
    fn test_get_person() {
        let db = test_db();
        let id = db.create_person("Grace", Role::Teacher, None).unwrap();

        let person = db.get_person(id).unwrap().unwrap();
        assert_eq!(person.name, "Grace");
        assert_eq!(person.role, Role::Teacher);
        assert_eq!(person.class_name, None);
        assert!(db.get_person(id + 100).unwrap().is_none());
    }
}

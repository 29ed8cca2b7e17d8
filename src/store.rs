use std;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

/// `(organism_name, protein_id)` - the atomic unit being clustered. Globally
/// unique and immutable once observed.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProteinKey {
    pub org_name: String,
    pub protein_id: i64,
}

/// One row of the family table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FamilyRow {
    pub hfam: i64,
    pub org_id: i64,
    pub org_name: String,
    pub protein_id: i64,
}

impl FamilyRow {
    pub fn key(&self) -> ProteinKey {
        ProteinKey {
            org_name: self.org_name.clone(),
            protein_id: self.protein_id,
        }
    }
}

/// Repository over the genomics database: the hit table (read-only), the
/// family table (mutated during linking), the organism catalog and the
/// annotation tables. All SQL lives here; values are always bound parameters,
/// table names are validated identifiers interpolated once.
pub struct GenomicsDb {
    conn: Connection,
    hit_table: String,
    family_table: String,
}

fn is_valid_table_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn in_placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

impl GenomicsDb {
    pub fn open<P: AsRef<Path>>(
        path: P,
        hit_table: &str,
        family_table: &str,
    ) -> Result<GenomicsDb, String> {
        for (label, name) in &[("hit", hit_table), ("family", family_table)] {
            if !is_valid_table_name(name) {
                return Err(format!(
                    "Invalid {} table name '{}' - table names may only contain letters, digits and underscores",
                    label, name
                ));
            }
        }
        if !path.as_ref().exists() {
            return Err(format!(
                "Database file {} does not exist",
                path.as_ref().to_string_lossy()
            ));
        }
        let conn = Connection::open(path.as_ref()).map_err(|e| {
            format!(
                "Failed to open database {}: {}",
                path.as_ref().to_string_lossy(),
                e
            )
        })?;
        Ok(GenomicsDb {
            conn,
            hit_table: hit_table.to_string(),
            family_table: family_table.to_string(),
        })
    }

    pub fn hit_table(&self) -> &str {
        &self.hit_table
    }

    pub fn family_table(&self) -> &str {
        &self.family_table
    }

    pub fn table_exists(&self, table: &str) -> rusqlite::Result<bool> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Create the family table and its indexes when absent.
    pub fn ensure_family_table(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {f} (
                 hfam INTEGER NOT NULL,
                 org_id INTEGER NOT NULL,
                 org_name TEXT NOT NULL,
                 protein_id INTEGER NOT NULL
             );
             CREATE UNIQUE INDEX IF NOT EXISTS i_{f}_hfam_org_prot ON {f} (hfam, org_name, protein_id);
             CREATE INDEX IF NOT EXISTS i_{f}_org_prot ON {f} (org_name, protein_id);",
            f = self.family_table
        ))
    }

    /// All organisms appearing on either side of the hit table.
    pub fn hit_organisms(&self) -> rusqlite::Result<Vec<String>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT DISTINCT q_org FROM {h} UNION SELECT DISTINCT h_org FROM {h} ORDER BY 1",
            h = self.hit_table
        ))?;
        let organisms = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(organisms)
    }

    /// The distinct ordered `(q_org, h_org)` pairs present in the hit table.
    pub fn hit_organism_pairs(&self) -> rusqlite::Result<BTreeSet<(String, String)>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT DISTINCT q_org, h_org FROM {}",
            self.hit_table
        ))?;
        let pairs = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<BTreeSet<(String, String)>>>()?;
        Ok(pairs)
    }

    pub fn family_organisms(&self) -> rusqlite::Result<Vec<String>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT DISTINCT org_name FROM {} ORDER BY org_name",
            self.family_table
        ))?;
        let organisms = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(organisms)
    }

    pub fn max_hfam(&self) -> rusqlite::Result<Option<i64>> {
        self.conn.query_row(
            &format!("SELECT MAX(hfam) FROM {}", self.family_table),
            [],
            |row| row.get(0),
        )
    }

    /// Organism catalog lookup, name to org_id, cached by callers for the run.
    pub fn organism_ids(&self) -> rusqlite::Result<HashMap<String, i64>> {
        let mut stmt = self.conn.prepare("SELECT name, org_id FROM organism")?;
        let mut ids = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (name, org_id) = row?;
            ids.insert(name, org_id);
        }
        Ok(ids)
    }

    /// The distinct protein identifiers of one organism appearing on either
    /// side of the hit table.
    pub fn organism_proteins(&self, org_name: &str) -> rusqlite::Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT DISTINCT q_protein_id FROM {h} WHERE q_org = ?1
             UNION
             SELECT DISTINCT h_protein_id FROM {h} WHERE h_org = ?1
             ORDER BY 1",
            h = self.hit_table
        ))?;
        let proteins = stmt
            .query_map(params![org_name], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(proteins)
    }

    /// The other endpoint of every hit touching the given protein, restricted
    /// to hits whose endpoints both lie in the working organism set.
    pub fn hit_partners(
        &self,
        org_name: &str,
        protein_id: i64,
        working_organisms: &BTreeSet<String>,
    ) -> rusqlite::Result<Vec<ProteinKey>> {
        let placeholders = in_placeholders(working_organisms.len());
        let sql = format!(
            "SELECT h_org, h_protein_id FROM {h} WHERE q_org = ? AND q_protein_id = ? AND h_org IN ({p})
             UNION
             SELECT q_org, q_protein_id FROM {h} WHERE h_org = ? AND h_protein_id = ? AND q_org IN ({p})
             ORDER BY 1, 2",
            h = self.hit_table,
            p = placeholders
        );

        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        param_values.push(Box::new(org_name.to_string()));
        param_values.push(Box::new(protein_id));
        for working in working_organisms {
            param_values.push(Box::new(working.clone()));
        }
        param_values.push(Box::new(org_name.to_string()));
        param_values.push(Box::new(protein_id));
        for working in working_organisms {
            param_values.push(Box::new(working.clone()));
        }
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(AsRef::as_ref).collect();

        let mut stmt = self.conn.prepare_cached(&sql)?;
        let partners = stmt
            .query_map(param_refs.as_slice(), |row| {
                Ok(ProteinKey {
                    org_name: row.get(0)?,
                    protein_id: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<ProteinKey>>>()?;
        Ok(partners)
    }

    /// All distinct families currently claiming the given protein. Zero
    /// entries for never-clustered proteins, more than one while the
    /// duplicate condition is present.
    pub fn families_of_protein(&self, key: &ProteinKey) -> rusqlite::Result<Vec<i64>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT DISTINCT hfam FROM {} WHERE org_name = ?1 AND protein_id = ?2 ORDER BY hfam",
            self.family_table
        ))?;
        let families = stmt
            .query_map(params![key.org_name, key.protein_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(families)
    }

    pub fn members_of_families(&self, hfams: &BTreeSet<i64>) -> rusqlite::Result<Vec<FamilyRow>> {
        if hfams.is_empty() {
            return Ok(vec![]);
        }
        let sql = format!(
            "SELECT hfam, org_id, org_name, protein_id FROM {} WHERE hfam IN ({})
             ORDER BY org_name, protein_id",
            self.family_table,
            in_placeholders(hfams.len())
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let members = stmt
            .query_map(rusqlite::params_from_iter(hfams.iter()), |row| {
                Ok(FamilyRow {
                    hfam: row.get(0)?,
                    org_id: row.get(1)?,
                    org_name: row.get(2)?,
                    protein_id: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<FamilyRow>>>()?;
        Ok(members)
    }

    pub fn delete_families(&self, hfams: &BTreeSet<i64>) -> rusqlite::Result<usize> {
        if hfams.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "DELETE FROM {} WHERE hfam IN ({})",
            self.family_table,
            in_placeholders(hfams.len())
        );
        self.conn
            .execute(&sql, rusqlite::params_from_iter(hfams.iter()))
    }

    /// Insert family rows in one transaction with duplicate-key-ignoring
    /// semantics: re-inserting an already present row is a no-op, not an
    /// error.
    pub fn insert_members(&self, rows: &[FamilyRow]) -> rusqlite::Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT OR IGNORE INTO {} (hfam, org_id, org_name, protein_id) VALUES (?1, ?2, ?3, ?4)",
                self.family_table
            ))?;
            for row in rows {
                stmt.execute(params![row.hfam, row.org_id, row.org_name, row.protein_id])?;
            }
        }
        tx.commit()
    }

    /// Delete the given families and insert their replacement rows in a
    /// single transaction.
    pub fn replace_families(
        &self,
        hfams: &BTreeSet<i64>,
        rows: &[FamilyRow],
    ) -> rusqlite::Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let delete_sql = format!(
                "DELETE FROM {} WHERE hfam IN ({})",
                self.family_table,
                in_placeholders(hfams.len())
            );
            tx.execute(&delete_sql, rusqlite::params_from_iter(hfams.iter()))?;
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT OR IGNORE INTO {} (hfam, org_id, org_name, protein_id) VALUES (?1, ?2, ?3, ?4)",
                self.family_table
            ))?;
            for row in rows {
                stmt.execute(params![row.hfam, row.org_id, row.org_name, row.protein_id])?;
            }
        }
        tx.commit()
    }

    /// One protein currently claimed by more than one family, lowest key
    /// first so the resolver's pick order is deterministic. None once the
    /// store satisfies the one-family-per-protein invariant.
    pub fn first_duplicated_protein(&self) -> rusqlite::Result<Option<ProteinKey>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT org_name, protein_id FROM {}
                     GROUP BY org_name, protein_id
                     HAVING COUNT(DISTINCT hfam) > 1
                     ORDER BY org_name, protein_id
                     LIMIT 1",
                    self.family_table
                ),
                [],
                |row| {
                    Ok(ProteinKey {
                        org_name: row.get(0)?,
                        protein_id: row.get(1)?,
                    })
                },
            )
            .optional()
    }

    /// Every protein claimed by more than one family, with its family count.
    pub fn duplicated_proteins(&self) -> rusqlite::Result<Vec<(ProteinKey, i64)>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT org_name, protein_id, COUNT(DISTINCT hfam) FROM {}
             GROUP BY org_name, protein_id
             HAVING COUNT(DISTINCT hfam) > 1
             ORDER BY org_name, protein_id",
            self.family_table
        ))?;
        let duplicated = stmt
            .query_map([], |row| {
                Ok((
                    ProteinKey {
                        org_name: row.get(0)?,
                        protein_id: row.get(1)?,
                    },
                    row.get(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<(ProteinKey, i64)>>>()?;
        Ok(duplicated)
    }

    pub fn family_rows(&self) -> rusqlite::Result<Vec<FamilyRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT hfam, org_id, org_name, protein_id FROM {}
             ORDER BY hfam, org_name, protein_id",
            self.family_table
        ))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(FamilyRow {
                    hfam: row.get(0)?,
                    org_id: row.get(1)?,
                    org_name: row.get(2)?,
                    protein_id: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<FamilyRow>>>()?;
        Ok(rows)
    }

    pub fn family_row_count(&self) -> rusqlite::Result<i64> {
        self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.family_table),
            [],
            |row| row.get(0),
        )
    }

    /// Left join the family table against the InterPro annotations into a
    /// derived `<family>_IPR` table, preserving unannotated family rows with
    /// NULL annotation columns. Returns the derived table name.
    pub fn create_interpro_view(&self) -> rusqlite::Result<String> {
        let view = format!("{}_IPR", self.family_table);
        self.conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS {view};
             CREATE TABLE {view} AS
             SELECT DISTINCT f.hfam, f.org_id, f.org_name, f.protein_id, pip.ipr_id, ipr.ipr_desc
             FROM {family} f
             LEFT JOIN protein_has_ipr pip
               ON f.org_id = pip.org_id AND f.protein_id = pip.protein_id
             LEFT JOIN ipr ON pip.ipr_id = ipr.ipr_id;
             CREATE INDEX i_{view}_all ON {view} (hfam, org_name, protein_id, ipr_id);
             CREATE INDEX i_{view}_org_prot ON {view} (org_name, protein_id);",
            view = view,
            family = self.family_table
        ))?;
        Ok(view)
    }

    /// As `create_interpro_view`, for the GO annotations.
    pub fn create_go_view(&self) -> rusqlite::Result<String> {
        let view = format!("{}_GO", self.family_table);
        self.conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS {view};
             CREATE TABLE {view} AS
             SELECT DISTINCT f.hfam, f.org_id, f.org_name, f.protein_id,
                    pgo.go_term_id, go.go_name, go.go_termtype
             FROM {family} f
             LEFT JOIN protein_has_go pgo
               ON f.org_id = pgo.org_id AND f.protein_id = pgo.protein_id
             LEFT JOIN go ON pgo.go_term_id = go.go_term_id;
             CREATE INDEX i_{view}_all ON {view} (hfam, org_name, protein_id, go_term_id);
             CREATE INDEX i_{view}_org_prot ON {view} (org_name, protein_id);",
            view = view,
            family = self.family_table
        ))?;
        Ok(view)
    }

    /// Organisms with at least one non-NULL annotation row in a derived view.
    pub fn organisms_with_annotation(
        &self,
        view: &str,
        annotation_column: &str,
    ) -> rusqlite::Result<Vec<String>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT DISTINCT org_name FROM {} WHERE {} IS NOT NULL ORDER BY org_name",
            view, annotation_column
        ))?;
        let organisms = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(organisms)
    }
}

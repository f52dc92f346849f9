//! 数据库查询操作

use crate::connection::DatabasePool;
use crate::models::*;
use chrono::Utc;
use radiate_core::{
    ComputationStatus, CtScan, DoseResult, Patient, Result, Roi, TpsError, TreatmentPlan,
};
use sqlx::{QueryBuilder, Row, Sqlite};

fn db_err(e: sqlx::Error) -> TpsError {
    TpsError::Database(e.to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// 剂量结果查询条件，按优先级：计划 > 患者 > CT
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ResultFilter {
    #[default]
    All,
    Plan(i64),
    Patient(String),
    CtScan(i64),
}

/// 数据库查询操作接口
pub struct DatabaseQueries<'a> {
    pool: &'a DatabasePool,
}

impl<'a> DatabaseQueries<'a> {
    pub fn new(pool: &'a DatabasePool) -> Self {
        Self { pool }
    }

    /// 创建数据库表
    pub async fn create_tables(&self) -> Result<()> {
        let pool = self.pool.pool();

        // 创建患者表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS patients (
                id VARCHAR(50) PRIMARY KEY,
                name VARCHAR(200) NOT NULL,
                birth_date DATE,
                sex CHAR(1),
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL
            )
        "#).execute(pool).await.map_err(db_err)?;

        // 创建 CT 表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS ct_scans (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                patient_id VARCHAR(50) NOT NULL REFERENCES patients(id) ON DELETE CASCADE,
                name VARCHAR(200),
                file_path VARCHAR(500),
                dataset_name VARCHAR(200),
                slice_count INTEGER,
                spacing VARCHAR(100),
                origin VARCHAR(100),
                grid_size VARCHAR(100),
                created_at TIMESTAMP NOT NULL
            )
        "#).execute(pool).await.map_err(db_err)?;

        // 创建 ROI 表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS rois (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                patient_id VARCHAR(50) NOT NULL REFERENCES patients(id) ON DELETE CASCADE,
                ct_scan_id INTEGER REFERENCES ct_scans(id) ON DELETE CASCADE,
                name VARCHAR(200) NOT NULL,
                roi_type VARCHAR(50),
                color VARCHAR(20),
                mask_file_path VARCHAR(500),
                created_at TIMESTAMP NOT NULL
            )
        "#).execute(pool).await.map_err(db_err)?;

        // 创建治疗计划表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS treatment_plans (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                patient_id VARCHAR(50) NOT NULL REFERENCES patients(id) ON DELETE CASCADE,
                ct_scan_id INTEGER NOT NULL REFERENCES ct_scans(id) ON DELETE CASCADE,
                plan_name VARCHAR(200) NOT NULL,
                plan_type VARCHAR(50),
                beam_names TEXT,
                gantry_angles TEXT,
                couch_angles TEXT,
                spot_spacing REAL,
                layer_spacing REAL,
                target_margin REAL,
                target_roi_id INTEGER REFERENCES rois(id) ON DELETE SET NULL,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL
            )
        "#).execute(pool).await.map_err(db_err)?;

        // 创建剂量结果表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS dose_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                plan_id INTEGER NOT NULL REFERENCES treatment_plans(id) ON DELETE CASCADE,
                ct_scan_id INTEGER NOT NULL REFERENCES ct_scans(id) ON DELETE CASCADE,
                roi_id INTEGER REFERENCES rois(id) ON DELETE SET NULL,
                dose_file_path VARCHAR(500),
                dvh_file_path VARCHAR(500),
                visualization_image_path VARCHAR(500),
                d95 REAL,
                d5 REAL,
                mean_dose REAL,
                max_dose REAL,
                dvh_data TEXT,
                computation_status VARCHAR(50) NOT NULL DEFAULT 'pending',
                error_message TEXT,
                created_at TIMESTAMP NOT NULL
            )
        "#).execute(pool).await.map_err(db_err)?;

        // 创建索引以优化查询性能
        self.create_indexes().await?;

        tracing::info!("Database tables created successfully");
        Ok(())
    }

    /// 创建数据库索引
    async fn create_indexes(&self) -> Result<()> {
        let pool = self.pool.pool();

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_ct_scans_patient_id ON ct_scans(patient_id)",
            "CREATE INDEX IF NOT EXISTS idx_rois_patient_id ON rois(patient_id)",
            "CREATE INDEX IF NOT EXISTS idx_rois_ct_scan_id ON rois(ct_scan_id)",
            "CREATE INDEX IF NOT EXISTS idx_plans_patient_id ON treatment_plans(patient_id)",
            "CREATE INDEX IF NOT EXISTS idx_plans_ct_scan_id ON treatment_plans(ct_scan_id)",
            "CREATE INDEX IF NOT EXISTS idx_dose_results_plan_id ON dose_results(plan_id)",
            "CREATE INDEX IF NOT EXISTS idx_dose_results_ct_scan_id ON dose_results(ct_scan_id)",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql).execute(pool).await.map_err(db_err)?;
        }

        tracing::debug!("Database indexes created successfully");
        Ok(())
    }

    // ========== 患者相关操作 ==========

    /// 创建新患者
    pub async fn create_patient(&self, patient: &NewPatient) -> Result<Patient> {
        let pool = self.pool.pool();
        let now = Utc::now();

        sqlx::query(r#"
            INSERT INTO patients (id, name, birth_date, sex, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
        "#)
        .bind(&patient.id)
        .bind(&patient.name)
        .bind(patient.birth_date)
        .bind(patient.sex.map(|s| s.as_code()))
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(db_err)?;

        self.get_patient(&patient.id)
            .await?
            .ok_or_else(|| TpsError::Internal(format!("patient {} vanished after insert", patient.id)))
    }

    /// 根据ID查找患者
    pub async fn get_patient(&self, id: &str) -> Result<Option<Patient>> {
        let result = sqlx::query_as::<_, DbPatient>("SELECT * FROM patients WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)?;

        Ok(result.map(Patient::from))
    }

    /// 所有患者，按创建时间排序
    pub async fn list_patients(&self) -> Result<Vec<Patient>> {
        let results = sqlx::query_as::<_, DbPatient>("SELECT * FROM patients ORDER BY created_at, id")
            .fetch_all(self.pool.pool())
            .await
            .map_err(db_err)?;

        Ok(results.into_iter().map(Patient::from).collect())
    }

    /// 删除患者，级联删除其 CT、ROI、计划与剂量结果
    pub async fn delete_patient(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM patients WHERE id = ?")
            .bind(id)
            .execute(self.pool.pool())
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    // ========== CT 相关操作 ==========

    /// 创建 CT 记录
    pub async fn create_ct_scan(&self, ct: &NewCtScan) -> Result<CtScan> {
        let pool = self.pool.pool();

        let id: i64 = sqlx::query(r#"
            INSERT INTO ct_scans (patient_id, name, file_path, dataset_name, slice_count, spacing, origin, grid_size, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
        "#)
        .bind(&ct.patient_id)
        .bind(&ct.name)
        .bind(&ct.file_path)
        .bind(&ct.dataset_name)
        .bind(ct.slice_count)
        .bind(ct.spacing.as_ref().map(to_json).transpose()?)
        .bind(ct.origin.as_ref().map(to_json).transpose()?)
        .bind(ct.grid_size.as_ref().map(to_json).transpose()?)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
        .map(|row| row.get("id"))
        .map_err(db_err)?;

        self.get_ct_scan(id)
            .await?
            .ok_or_else(|| TpsError::Internal(format!("CT scan {} vanished after insert", id)))
    }

    pub async fn get_ct_scan(&self, id: i64) -> Result<Option<CtScan>> {
        let result = sqlx::query_as::<_, DbCtScan>("SELECT * FROM ct_scans WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)?;

        Ok(result.map(CtScan::from))
    }

    /// CT 列表，可按患者过滤
    pub async fn list_ct_scans(&self, patient_id: Option<&str>) -> Result<Vec<CtScan>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM ct_scans");
        if let Some(patient_id) = patient_id {
            qb.push(" WHERE patient_id = ").push_bind(patient_id.to_string());
        }
        qb.push(" ORDER BY id");

        let results = qb
            .build_query_as::<DbCtScan>()
            .fetch_all(self.pool.pool())
            .await
            .map_err(db_err)?;

        Ok(results.into_iter().map(CtScan::from).collect())
    }

    /// 删除 CT，级联删除其 ROI、计划与剂量结果
    pub async fn delete_ct_scan(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM ct_scans WHERE id = ?")
            .bind(id)
            .execute(self.pool.pool())
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    // ========== ROI 相关操作 ==========

    pub async fn create_roi(&self, roi: &NewRoi) -> Result<Roi> {
        let id: i64 = sqlx::query(r#"
            INSERT INTO rois (patient_id, ct_scan_id, name, roi_type, color, mask_file_path, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
        "#)
        .bind(&roi.patient_id)
        .bind(roi.ct_scan_id)
        .bind(&roi.name)
        .bind(&roi.roi_type)
        .bind(&roi.color)
        .bind(&roi.mask_file_path)
        .bind(Utc::now())
        .fetch_one(self.pool.pool())
        .await
        .map(|row| row.get("id"))
        .map_err(db_err)?;

        self.get_roi(id)
            .await?
            .ok_or_else(|| TpsError::Internal(format!("ROI {} vanished after insert", id)))
    }

    pub async fn get_roi(&self, id: i64) -> Result<Option<Roi>> {
        let result = sqlx::query_as::<_, DbRoi>("SELECT * FROM rois WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)?;

        Ok(result.map(Roi::from))
    }

    /// ROI 列表，可按患者和/或 CT 过滤
    pub async fn list_rois(&self, patient_id: Option<&str>, ct_scan_id: Option<i64>) -> Result<Vec<Roi>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM rois WHERE 1 = 1");
        if let Some(patient_id) = patient_id {
            qb.push(" AND patient_id = ").push_bind(patient_id.to_string());
        }
        if let Some(ct_scan_id) = ct_scan_id {
            qb.push(" AND ct_scan_id = ").push_bind(ct_scan_id);
        }
        qb.push(" ORDER BY id");

        let results = qb
            .build_query_as::<DbRoi>()
            .fetch_all(self.pool.pool())
            .await
            .map_err(db_err)?;

        Ok(results.into_iter().map(Roi::from).collect())
    }

    pub async fn list_rois_for_ct_scan(&self, ct_scan_id: i64) -> Result<Vec<Roi>> {
        self.list_rois(None, Some(ct_scan_id)).await
    }

    pub async fn delete_roi(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM rois WHERE id = ?")
            .bind(id)
            .execute(self.pool.pool())
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    // ========== 治疗计划相关操作 ==========

    pub async fn create_plan(&self, plan: &NewTreatmentPlan) -> Result<TreatmentPlan> {
        let now = Utc::now();

        let id: i64 = sqlx::query(r#"
            INSERT INTO treatment_plans (
                patient_id, ct_scan_id, plan_name, plan_type, beam_names, gantry_angles, couch_angles,
                spot_spacing, layer_spacing, target_margin, target_roi_id, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
        "#)
        .bind(&plan.patient_id)
        .bind(plan.ct_scan_id)
        .bind(&plan.plan_name)
        .bind(plan.plan_type.as_str())
        .bind(to_json(&plan.beam_names)?)
        .bind(to_json(&plan.gantry_angles)?)
        .bind(to_json(&plan.couch_angles)?)
        .bind(plan.spot_spacing)
        .bind(plan.layer_spacing)
        .bind(plan.target_margin)
        .bind(plan.target_roi_id)
        .bind(now)
        .bind(now)
        .fetch_one(self.pool.pool())
        .await
        .map(|row| row.get("id"))
        .map_err(db_err)?;

        self.get_plan(id)
            .await?
            .ok_or_else(|| TpsError::Internal(format!("plan {} vanished after insert", id)))
    }

    pub async fn get_plan(&self, id: i64) -> Result<Option<TreatmentPlan>> {
        let result = sqlx::query_as::<_, DbTreatmentPlan>("SELECT * FROM treatment_plans WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)?;

        Ok(result.map(TreatmentPlan::from))
    }

    /// 计划列表，最新的在前
    pub async fn list_plans(&self, patient_id: Option<&str>, ct_scan_id: Option<i64>) -> Result<Vec<TreatmentPlan>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM treatment_plans WHERE 1 = 1");
        if let Some(patient_id) = patient_id {
            qb.push(" AND patient_id = ").push_bind(patient_id.to_string());
        }
        if let Some(ct_scan_id) = ct_scan_id {
            qb.push(" AND ct_scan_id = ").push_bind(ct_scan_id);
        }
        qb.push(" ORDER BY created_at DESC, id DESC");

        let results = qb
            .build_query_as::<DbTreatmentPlan>()
            .fetch_all(self.pool.pool())
            .await
            .map_err(db_err)?;

        Ok(results.into_iter().map(TreatmentPlan::from).collect())
    }

    /// 写回计划的可编辑字段
    pub async fn update_plan(&self, plan: &TreatmentPlan) -> Result<TreatmentPlan> {
        let result = sqlx::query(r#"
            UPDATE treatment_plans
            SET plan_name = ?, plan_type = ?, beam_names = ?, gantry_angles = ?, couch_angles = ?,
                spot_spacing = ?, layer_spacing = ?, target_margin = ?, target_roi_id = ?, updated_at = ?
            WHERE id = ?
        "#)
        .bind(&plan.plan_name)
        .bind(plan.plan_type.as_str())
        .bind(to_json(&plan.beam_names)?)
        .bind(to_json(&plan.gantry_angles)?)
        .bind(to_json(&plan.couch_angles)?)
        .bind(plan.spot_spacing)
        .bind(plan.layer_spacing)
        .bind(plan.target_margin)
        .bind(plan.target_roi_id)
        .bind(Utc::now())
        .bind(plan.id)
        .execute(self.pool.pool())
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(TpsError::not_found(format!("Plan with ID {} not found", plan.id)));
        }
        self.get_plan(plan.id)
            .await?
            .ok_or_else(|| TpsError::not_found(format!("Plan with ID {} not found", plan.id)))
    }

    /// 删除计划，级联删除其剂量结果
    pub async fn delete_plan(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM treatment_plans WHERE id = ?")
            .bind(id)
            .execute(self.pool.pool())
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    // ========== 剂量结果相关操作 ==========

    /// 创建状态为 `computing` 的剂量结果
    pub async fn create_dose_result(&self, plan_id: i64, ct_scan_id: i64, roi_id: Option<i64>) -> Result<DoseResult> {
        let id: i64 = sqlx::query(r#"
            INSERT INTO dose_results (plan_id, ct_scan_id, roi_id, computation_status, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
        "#)
        .bind(plan_id)
        .bind(ct_scan_id)
        .bind(roi_id)
        .bind(ComputationStatus::Computing.as_str())
        .bind(Utc::now())
        .fetch_one(self.pool.pool())
        .await
        .map(|row| row.get("id"))
        .map_err(db_err)?;

        self.get_dose_result(id).await
    }

    async fn get_dose_result(&self, id: i64) -> Result<DoseResult> {
        sqlx::query_as::<_, DbDoseResult>("SELECT * FROM dose_results WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)?
            .map(DoseResult::from)
            .ok_or_else(|| TpsError::not_found(format!("Dose result {} not found", id)))
    }

    /// 标记计算完成并写入统计量与文件路径
    pub async fn complete_dose_result(&self, id: i64, dose: &CompletedDose) -> Result<DoseResult> {
        sqlx::query(r#"
            UPDATE dose_results
            SET dose_file_path = ?, dvh_file_path = ?, visualization_image_path = ?,
                d95 = ?, d5 = ?, mean_dose = ?, max_dose = ?, dvh_data = ?,
                computation_status = ?, error_message = NULL
            WHERE id = ?
        "#)
        .bind(&dose.dose_file_path)
        .bind(&dose.dvh_file_path)
        .bind(&dose.visualization_image_path)
        .bind(dose.d95)
        .bind(dose.d5)
        .bind(dose.mean_dose)
        .bind(dose.max_dose)
        .bind(dose.dvh_data.as_ref().map(to_json).transpose()?)
        .bind(ComputationStatus::Completed.as_str())
        .bind(id)
        .execute(self.pool.pool())
        .await
        .map_err(db_err)?;

        self.get_dose_result(id).await
    }

    /// 标记计算失败
    pub async fn fail_dose_result(&self, id: i64, message: &str) -> Result<DoseResult> {
        sqlx::query("UPDATE dose_results SET computation_status = ?, error_message = ? WHERE id = ?")
            .bind(ComputationStatus::Failed.as_str())
            .bind(message)
            .bind(id)
            .execute(self.pool.pool())
            .await
            .map_err(db_err)?;

        self.get_dose_result(id).await
    }

    /// 剂量结果列表，最新的在前
    pub async fn list_dose_results(&self, filter: &ResultFilter) -> Result<Vec<DoseResult>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT dose_results.* FROM dose_results");
        match filter {
            ResultFilter::All => {}
            ResultFilter::Plan(plan_id) => {
                qb.push(" WHERE dose_results.plan_id = ").push_bind(*plan_id);
            }
            ResultFilter::Patient(patient_id) => {
                qb.push(" JOIN treatment_plans ON treatment_plans.id = dose_results.plan_id")
                    .push(" WHERE treatment_plans.patient_id = ")
                    .push_bind(patient_id.clone());
            }
            ResultFilter::CtScan(ct_scan_id) => {
                qb.push(" WHERE dose_results.ct_scan_id = ").push_bind(*ct_scan_id);
            }
        }
        qb.push(" ORDER BY dose_results.created_at DESC, dose_results.id DESC");

        let results = qb
            .build_query_as::<DbDoseResult>()
            .fetch_all(self.pool.pool())
            .await
            .map_err(db_err)?;

        Ok(results.into_iter().map(DoseResult::from).collect())
    }

    pub async fn list_dose_results_for_plan(&self, plan_id: i64) -> Result<Vec<DoseResult>> {
        self.list_dose_results(&ResultFilter::Plan(plan_id)).await
    }

    /// 某 CT 最近一次完成且有剂量文件的结果
    pub async fn latest_completed_dose_result(&self, ct_scan_id: i64) -> Result<Option<DoseResult>> {
        let result = sqlx::query_as::<_, DbDoseResult>(r#"
            SELECT * FROM dose_results
            WHERE ct_scan_id = ? AND computation_status = ? AND dose_file_path IS NOT NULL
            ORDER BY created_at DESC, id DESC
            LIMIT 1
        "#)
        .bind(ct_scan_id)
        .bind(ComputationStatus::Completed.as_str())
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(result.map(DoseResult::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radiate_core::{DvhData, PlanType, Sex};

    async fn setup() -> DatabasePool {
        let pool = DatabasePool::connect("sqlite::memory:", 1).await.unwrap();
        DatabaseQueries::new(&pool).create_tables().await.unwrap();
        pool
    }

    async fn seed(q: &DatabaseQueries<'_>) -> (CtScan, Roi, TreatmentPlan) {
        q.create_patient(&NewPatient {
            id: "P001".to_string(),
            name: "Jane Roe".to_string(),
            birth_date: chrono::NaiveDate::from_ymd_opt(1970, 5, 1),
            sex: Some(Sex::Female),
        })
        .await
        .unwrap();
        let ct = q
            .create_ct_scan(&NewCtScan {
                patient_id: "P001".to_string(),
                name: Some("CT".to_string()),
                dataset_name: Some("case1".to_string()),
                slice_count: Some(40),
                spacing: Some([1.0, 1.0, 2.5]),
                grid_size: Some([64, 64, 40]),
                ..Default::default()
            })
            .await
            .unwrap();
        let roi = q
            .create_roi(&NewRoi {
                patient_id: "P001".to_string(),
                ct_scan_id: Some(ct.id),
                name: "PTV".to_string(),
                roi_type: Some("Target".to_string()),
                color: Some("255,0,0".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let mut new_plan = NewTreatmentPlan::with_defaults("P001".to_string(), ct.id);
        new_plan.target_roi_id = Some(roi.id);
        let plan = q.create_plan(&new_plan).await.unwrap();
        (ct, roi, plan)
    }

    #[tokio::test]
    async fn test_patient_round_trip_and_duplicate() {
        let pool = setup().await;
        let q = DatabaseQueries::new(&pool);
        seed(&q).await;

        let patient = q.get_patient("P001").await.unwrap().unwrap();
        assert_eq!(patient.sex, Some(Sex::Female));
        assert!(patient.created_at.is_some());

        let dup = q
            .create_patient(&NewPatient {
                id: "P001".to_string(),
                name: "Other".to_string(),
                birth_date: None,
                sex: None,
            })
            .await;
        assert!(matches!(dup, Err(TpsError::Database(_))));
        assert_eq!(q.list_patients().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ct_scan_json_columns() {
        let pool = setup().await;
        let q = DatabaseQueries::new(&pool);
        let (ct, _, _) = seed(&q).await;

        assert_eq!(ct.spacing, Some([1.0, 1.0, 2.5]));
        assert_eq!(ct.grid_size, Some([64, 64, 40]));
        assert_eq!(ct.origin, None);
        assert_eq!(q.list_ct_scans(Some("P001")).await.unwrap().len(), 1);
        assert!(q.list_ct_scans(Some("P999")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_plan_update_and_roi_delete_nulls_target() {
        let pool = setup().await;
        let q = DatabaseQueries::new(&pool);
        let (ct, roi, plan) = seed(&q).await;
        assert_eq!(plan.beam_names.len(), 3);
        assert_eq!(plan.plan_type, PlanType::Proton);

        let mut edited = plan.clone();
        PlanUpdate {
            plan_name: Some("Boost".to_string()),
            gantry_angles: Some(vec![10.0, 100.0, 280.0]),
            ..Default::default()
        }
        .apply(&mut edited);
        let updated = q.update_plan(&edited).await.unwrap();
        assert_eq!(updated.plan_name, "Boost");
        assert_eq!(updated.gantry_angles, vec![10.0, 100.0, 280.0]);

        assert!(q.delete_roi(roi.id).await.unwrap());
        let reloaded = q.get_plan(plan.id).await.unwrap().unwrap();
        assert_eq!(reloaded.target_roi_id, None);
        assert_eq!(q.list_plans(None, Some(ct.id)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dose_result_lifecycle() {
        let pool = setup().await;
        let q = DatabaseQueries::new(&pool);
        let (ct, roi, plan) = seed(&q).await;

        let pending = q.create_dose_result(plan.id, ct.id, Some(roi.id)).await.unwrap();
        assert_eq!(pending.computation_status, ComputationStatus::Computing);
        assert!(q.latest_completed_dose_result(ct.id).await.unwrap().is_none());

        let done = q
            .complete_dose_result(
                pending.id,
                &CompletedDose {
                    dose_file_path: Some("Output/dose.npy".to_string()),
                    d95: Some(57.0),
                    dvh_data: Some(DvhData {
                        dose_values: vec![0.0, 60.0],
                        volume_percentages: vec![100.0, 0.0],
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(done.computation_status, ComputationStatus::Completed);
        assert_eq!(done.dvh_data.unwrap().dose_values, vec![0.0, 60.0]);

        let failed = q.create_dose_result(plan.id, ct.id, None).await.unwrap();
        let failed = q.fail_dose_result(failed.id, "engine crashed").await.unwrap();
        assert_eq!(failed.error_message.as_deref(), Some("engine crashed"));

        let latest = q.latest_completed_dose_result(ct.id).await.unwrap().unwrap();
        assert_eq!(latest.id, done.id);

        let by_patient = q
            .list_dose_results(&ResultFilter::Patient("P001".to_string()))
            .await
            .unwrap();
        assert_eq!(by_patient.len(), 2);
        assert_eq!(by_patient[0].id, failed.id);
    }

    #[tokio::test]
    async fn test_patient_delete_cascades() {
        let pool = setup().await;
        let q = DatabaseQueries::new(&pool);
        let (ct, _, plan) = seed(&q).await;
        q.create_dose_result(plan.id, ct.id, None).await.unwrap();

        assert!(q.delete_patient("P001").await.unwrap());
        assert!(q.get_ct_scan(ct.id).await.unwrap().is_none());
        assert!(q.list_rois(Some("P001"), None).await.unwrap().is_empty());
        assert!(q.get_plan(plan.id).await.unwrap().is_none());
        assert!(q.list_dose_results(&ResultFilter::All).await.unwrap().is_empty());
        assert!(!q.delete_patient("P001").await.unwrap());
    }
}

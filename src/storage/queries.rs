//! SQL text for the telemetry store.
//!
//! Timestamps are stored as UTC text in one fixed layout, so lexical
//! comparison in `WHERE` clauses matches chronological order.

/// Schema applied at open. Idempotent.
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS device_inventories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    serial_number TEXT NOT NULL UNIQUE,
    model TEXT NOT NULL DEFAULT 'generic',
    firmware_version TEXT,
    status TEXT NOT NULL DEFAULT 'available'
);

CREATE TABLE IF NOT EXISTS client_devices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    device_inventory_id INTEGER NOT NULL UNIQUE
        REFERENCES device_inventories(id) ON DELETE CASCADE,
    client_id INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    activated_at TEXT,
    last_ping TEXT
);

CREATE TABLE IF NOT EXISTS vehicles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    client_device_id INTEGER NOT NULL REFERENCES client_devices(id) ON DELETE CASCADE,
    vin TEXT NOT NULL UNIQUE,
    supported_pids TEXT NOT NULL DEFAULT '[]',
    first_reading_at TEXT,
    last_reading_at TEXT,
    status INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_vehicles_device ON vehicles(client_device_id, status);

CREATE TABLE IF NOT EXISTS sensors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pid TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    category TEXT NOT NULL DEFAULT 'engine',
    unit TEXT NOT NULL,
    requires_calculation INTEGER NOT NULL DEFAULT 0,
    calculation_formula TEXT,
    min_value REAL,
    max_value REAL,
    data_bytes INTEGER NOT NULL DEFAULT 1,
    is_standard INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS vehicle_sensors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    vehicle_id INTEGER NOT NULL REFERENCES vehicles(id) ON DELETE CASCADE,
    sensor_id INTEGER NOT NULL REFERENCES sensors(id) ON DELETE CASCADE,
    mapping_key TEXT,
    source_type TEXT NOT NULL DEFAULT 'OBD2',
    is_active INTEGER NOT NULL DEFAULT 1,
    last_reading_at TEXT,
    UNIQUE(vehicle_id, sensor_id)
);
CREATE INDEX IF NOT EXISTS idx_vehicle_sensors_mapping ON vehicle_sensors(vehicle_id, mapping_key);

CREATE TABLE IF NOT EXISTS registers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    vehicle_sensor_id INTEGER NOT NULL REFERENCES vehicle_sensors(id) ON DELETE CASCADE,
    value REAL NOT NULL,
    recorded_at TEXT NOT NULL
);
DROP INDEX IF EXISTS idx_registers_sensor_time;
CREATE UNIQUE INDEX IF NOT EXISTS uq_registers_sensor_time ON registers(vehicle_sensor_id, recorded_at);

CREATE TABLE IF NOT EXISTS diagnostic_trouble_codes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    vehicle_id INTEGER NOT NULL REFERENCES vehicles(id) ON DELETE CASCADE,
    code TEXT NOT NULL,
    description TEXT,
    detected_at TEXT NOT NULL,
    redetected_at TEXT,
    resolved_at TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    UNIQUE(vehicle_id, code)
);
CREATE INDEX IF NOT EXISTS idx_dtc_vehicle_active ON diagnostic_trouble_codes(vehicle_id, is_active);
";

pub const SELECT_CLIENT_DEVICE: &str = "
SELECT cd.id, di.serial_number, cd.status, cd.last_ping
FROM client_devices cd
JOIN device_inventories di ON di.id = cd.device_inventory_id
WHERE di.serial_number = ?1";

pub const SELECT_DEVICE_VEHICLES: &str = "
SELECT id, client_device_id, vin, supported_pids, last_reading_at
FROM vehicles
WHERE client_device_id = ?1 AND status = 1
ORDER BY id";

pub const SELECT_VEHICLE_EXISTS: &str = "SELECT 1 FROM vehicles WHERE id = ?1";

/// Sensor columns, aliased `s`, in the order `row_to_sensor` reads them.
const SENSOR_COLUMNS: &str = "s.id, s.pid, s.name, s.unit, s.requires_calculation, \
     s.calculation_formula, s.min_value, s.max_value, s.data_bytes";

pub fn select_vehicle_bindings() -> String {
    format!(
        "SELECT vs.id, vs.vehicle_id, vs.mapping_key, vs.source_type, vs.is_active, \
         vs.last_reading_at, {}
         FROM vehicle_sensors vs
         JOIN sensors s ON s.id = vs.sensor_id
         WHERE vs.vehicle_id = ?1
         ORDER BY vs.id",
        SENSOR_COLUMNS
    )
}

pub fn select_registers_between() -> String {
    format!(
        "SELECT r.id, r.vehicle_sensor_id, r.value, r.recorded_at, {}
         FROM registers r
         JOIN vehicle_sensors vs ON vs.id = r.vehicle_sensor_id
         JOIN sensors s ON s.id = vs.sensor_id
         WHERE vs.vehicle_id = ?1 AND r.recorded_at BETWEEN ?2 AND ?3
         ORDER BY r.recorded_at, r.id",
        SENSOR_COLUMNS
    )
}

/// Most recent register per binding of a vehicle.
pub fn select_latest_readings() -> String {
    format!(
        "SELECT lr.id, lr.vehicle_sensor_id, lr.value, lr.recorded_at, {}
         FROM (
             SELECT r.id, r.vehicle_sensor_id, r.value, r.recorded_at,
                    ROW_NUMBER() OVER (
                        PARTITION BY r.vehicle_sensor_id
                        ORDER BY r.recorded_at DESC, r.id DESC
                    ) AS rn
             FROM registers r
             JOIN vehicle_sensors v ON v.id = r.vehicle_sensor_id
             WHERE v.vehicle_id = ?1
         ) lr
         JOIN vehicle_sensors vs ON vs.id = lr.vehicle_sensor_id
         JOIN sensors s ON s.id = vs.sensor_id
         WHERE lr.rn = 1
         ORDER BY s.pid",
        SENSOR_COLUMNS
    )
}

/// A redelivered frame hits the unique (binding, timestamp) key and writes nothing.
pub const INSERT_REGISTER: &str = "INSERT INTO registers (vehicle_sensor_id, value, recorded_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(vehicle_sensor_id, recorded_at) DO NOTHING";

/// Create-or-reopen in one statement. Returns a row only when something
/// was written: `redetected_at` NULL means created, set means reopened.
pub const UPSERT_DTC: &str = "
INSERT INTO diagnostic_trouble_codes (vehicle_id, code, description, detected_at, is_active)
VALUES (?1, ?2, ?3, ?4, 1)
ON CONFLICT(vehicle_id, code) DO UPDATE SET
    is_active = 1,
    redetected_at = excluded.detected_at
WHERE diagnostic_trouble_codes.is_active = 0
RETURNING id, detected_at, redetected_at";

pub const SELECT_DTC_BY_CODE: &str =
    "SELECT id, detected_at FROM diagnostic_trouble_codes WHERE vehicle_id = ?1 AND code = ?2";

const DTC_COLUMNS: &str =
    "id, vehicle_id, code, description, detected_at, redetected_at, resolved_at, is_active";

pub fn select_dtc_by_id() -> String {
    format!("SELECT {} FROM diagnostic_trouble_codes WHERE id = ?1", DTC_COLUMNS)
}

pub fn select_vehicle_dtcs(active_only: bool) -> String {
    let filter = if active_only { " AND is_active = 1" } else { "" };
    format!(
        "SELECT {} FROM diagnostic_trouble_codes WHERE vehicle_id = ?1{} \
         ORDER BY detected_at DESC, id DESC",
        DTC_COLUMNS, filter
    )
}

/// DTCs first detected or re-detected inside a window.
pub fn select_dtcs_between() -> String {
    format!(
        "SELECT {} FROM diagnostic_trouble_codes
         WHERE vehicle_id = ?1
           AND (detected_at BETWEEN ?2 AND ?3 OR redetected_at BETWEEN ?2 AND ?3)
         ORDER BY detected_at, id",
        DTC_COLUMNS
    )
}

pub const RESOLVE_DTC: &str =
    "UPDATE diagnostic_trouble_codes SET is_active = 0, resolved_at = ?2 WHERE id = ?1";

/// Reactivates a binding and moves its `last_reading_at` forward only.
pub const TOUCH_BINDING: &str = "
UPDATE vehicle_sensors SET
    is_active = 1,
    last_reading_at = CASE
        WHEN last_reading_at IS NULL OR last_reading_at < ?2 THEN ?2
        ELSE last_reading_at
    END
WHERE id = ?1";

pub const TOUCH_CLIENT_DEVICE: &str = "
UPDATE client_devices SET
    last_ping = ?2,
    status = CASE WHEN status IN ('pending', 'pending_setup') THEN 'active' ELSE status END,
    activated_at = COALESCE(activated_at, ?2)
WHERE id = ?1";

pub const TOUCH_VEHICLE: &str = "
UPDATE vehicles SET
    first_reading_at = COALESCE(first_reading_at, ?2),
    last_reading_at = CASE
        WHEN last_reading_at IS NULL OR last_reading_at < ?2 THEN ?2
        ELSE last_reading_at
    END
WHERE id = ?1";

pub const INSERT_INVENTORY: &str =
    "INSERT INTO device_inventories (serial_number, status) VALUES (?1, 'sold')";

pub const INSERT_CLIENT_DEVICE: &str =
    "INSERT INTO client_devices (device_inventory_id, client_id, status) VALUES (?1, ?2, ?3)";

pub const UPDATE_CLIENT_DEVICE_STATUS: &str = "UPDATE client_devices SET status = ?2 WHERE id = ?1";

pub const INSERT_VEHICLE: &str =
    "INSERT INTO vehicles (client_device_id, vin, supported_pids) VALUES (?1, ?2, ?3)";

/// A sensor requires calculation exactly when it carries a formula.
pub const UPSERT_SENSOR: &str = "
INSERT INTO sensors (pid, name, category, unit, requires_calculation, calculation_formula,
                     min_value, max_value, data_bytes)
VALUES (?1, ?2, ?3, ?4, ?5 IS NOT NULL, ?5, ?6, ?7, ?8)
ON CONFLICT(pid) DO UPDATE SET
    name = excluded.name,
    category = excluded.category,
    unit = excluded.unit,
    requires_calculation = excluded.requires_calculation,
    calculation_formula = excluded.calculation_formula,
    min_value = excluded.min_value,
    max_value = excluded.max_value,
    data_bytes = excluded.data_bytes
RETURNING id";

pub const INSERT_BINDING: &str = "
INSERT INTO vehicle_sensors (vehicle_id, sensor_id, mapping_key)
VALUES (?1, ?2, ?3)
ON CONFLICT(vehicle_id, sensor_id) DO UPDATE SET mapping_key = excluded.mapping_key
RETURNING id";

pub const SET_BINDING_ACTIVE: &str = "UPDATE vehicle_sensors SET is_active = ?2 WHERE id = ?1";

pub const COUNT_REGISTERS: &str = "
SELECT COUNT(*) FROM registers r
JOIN vehicle_sensors vs ON vs.id = r.vehicle_sensor_id
WHERE vs.vehicle_id = ?1";

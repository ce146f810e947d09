//! Region centroid fallback
//!
//! Coordinates are the administrative centres of the regions, which is what
//! the routing engine needs when nothing finer is known about an endpoint.

use super::GeoPoint;
use fpf_common::Result;
use sqlx::SqlitePool;
use tracing::info;

/// (ISO 3166-2 code, name, lat, lon)
pub const REGION_CENTROIDS: &[(&str, &str, f64, f64)] = &[
    ("RU-MOW", "Москва", 55.7558, 37.6173),
    ("RU-MOS", "Московская область", 55.5043, 38.0353),
    ("RU-SPE", "Санкт-Петербург", 59.9343, 30.3351),
    ("RU-LEN", "Ленинградская область", 59.5763, 30.1283),
    ("RU-TVE", "Тверская область", 56.8587, 35.9176),
    ("RU-YAR", "Ярославская область", 57.6261, 39.8845),
    ("RU-VLA", "Владимирская область", 56.1290, 40.4066),
    ("RU-KLU", "Калужская область", 54.5138, 36.2612),
    ("RU-TUL", "Тульская область", 54.1931, 37.6173),
    ("RU-RYA", "Рязанская область", 54.6269, 39.6916),
    ("RU-SMO", "Смоленская область", 54.7826, 32.0453),
    ("RU-NIZ", "Нижегородская область", 56.3269, 44.0059),
    ("RU-TA", "Республика Татарстан", 55.7887, 49.1221),
    ("RU-SAM", "Самарская область", 53.1959, 50.1002),
    ("RU-BA", "Республика Башкортостан", 54.7388, 55.9721),
    ("RU-PER", "Пермский край", 58.0105, 56.2502),
    ("RU-SVE", "Свердловская область", 56.8389, 60.6057),
    ("RU-CHE", "Челябинская область", 55.1644, 61.4368),
    ("RU-TYU", "Тюменская область", 57.1530, 65.5343),
    ("RU-NVS", "Новосибирская область", 55.0084, 82.9357),
    ("RU-OMS", "Омская область", 54.9885, 73.3242),
    ("RU-KYA", "Красноярский край", 56.0153, 92.8932),
    ("RU-IRK", "Иркутская область", 52.2870, 104.3050),
    ("RU-KDA", "Краснодарский край", 45.0355, 38.9753),
    ("RU-ROS", "Ростовская область", 47.2357, 39.7015),
    ("RU-VGG", "Волгоградская область", 48.7080, 44.5133),
    ("RU-VOR", "Воронежская область", 51.6720, 39.1843),
    ("RU-BEL", "Белгородская область", 50.5997, 36.5983),
    ("RU-KGD", "Калининградская область", 54.7104, 20.4522),
    ("RU-ARK", "Архангельская область", 64.5393, 40.5170),
    ("RU-MUR", "Мурманская область", 68.9585, 33.0827),
    ("RU-PRI", "Приморский край", 43.1155, 131.8855),
];

/// Seed built-in centroids without overwriting curated rows
pub async fn seed_region_centroids(pool: &SqlitePool) -> Result<u64> {
    let mut inserted = 0;
    for &(code, name, lat, lon) in REGION_CENTROIDS {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO region_centroids (region_code, name, lat, lon) VALUES (?, ?, ?, ?)",
        )
        .bind(code)
        .bind(name)
        .bind(lat)
        .bind(lon)
        .execute(pool)
        .await?;
        inserted += result.rows_affected();
    }
    if inserted > 0 {
        info!(inserted, "Seeded region centroids");
    }
    Ok(inserted)
}

/// Canonical lookup key for a region code (`ru-mow ` → `RU-MOW`)
pub fn region_key(code: &str) -> String {
    code.trim().to_uppercase()
}

pub async fn lookup_centroid(pool: &SqlitePool, region_code: &str) -> Result<Option<GeoPoint>> {
    let key = region_key(region_code);
    if key.is_empty() {
        return Ok(None);
    }
    let row: Option<(f64, f64)> =
        sqlx::query_as("SELECT lat, lon FROM region_centroids WHERE region_code = ?")
            .bind(&key)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|(lat, lon)| GeoPoint::new(lat, lon)).filter(GeoPoint::is_valid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_centroids_are_valid() {
        for &(code, _, lat, lon) in REGION_CENTROIDS {
            assert!(GeoPoint::new(lat, lon).is_valid(), "{}", code);
        }
    }

    #[tokio::test]
    async fn test_seed_is_idempotent_and_lookup_is_case_insensitive() {
        let pool = fpf_common::db::init_memory_database().await.unwrap();
        let first = seed_region_centroids(&pool).await.unwrap();
        assert_eq!(first as usize, REGION_CENTROIDS.len());
        assert_eq!(seed_region_centroids(&pool).await.unwrap(), 0);

        let msk = lookup_centroid(&pool, " ru-mow").await.unwrap().unwrap();
        assert!((msk.lat - 55.7558).abs() < 1e-9);
        assert_eq!(lookup_centroid(&pool, "RU-UNK").await.unwrap(), None);
        assert_eq!(lookup_centroid(&pool, "").await.unwrap(), None);
    }
}

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rayon::prelude::*;

/// 少于该数量的向量直接单线程扫描
const PARALLEL_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, Copy)]
pub struct Neighbor {
    /// 插入顺序 ID
    pub id: usize,
    /// 平方欧氏距离
    pub distance: f64,
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    // 距离相同时按 ID 升序，保证结果稳定
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance.total_cmp(&other.distance).then(self.id.cmp(&other.id))
    }
}

/// 保留最小的 k 个邻居，堆顶为当前最差的一个
pub struct TopKNeighbors {
    heap: BinaryHeap<Neighbor>,
    k: usize,
}

impl TopKNeighbors {
    pub fn new(k: usize) -> Self {
        Self { heap: BinaryHeap::with_capacity(k + 1), k }
    }

    pub fn push(&mut self, neighbor: Neighbor) {
        if self.heap.len() < self.k {
            self.heap.push(neighbor);
        } else if let Some(mut worst) = self.heap.peek_mut() {
            if neighbor < *worst {
                *worst = neighbor;
            }
        }
    }

    pub fn extend(&mut self, neighbors: impl IntoIterator<Item = Neighbor>) {
        for neighbor in neighbors {
            self.push(neighbor);
        }
    }

    pub fn merge(mut self, other: Self) -> Self {
        self.extend(other.heap);
        self
    }

    /// 按距离升序返回
    pub fn into_sorted_vec(self) -> Vec<Neighbor> {
        self.heap.into_sorted_vec()
    }
}

#[inline]
pub fn squared_l2(va: &[f32], vb: &[f32]) -> f64 {
    va.iter()
        .zip(vb)
        .map(|(&a, &b)| {
            let d = a as f64 - b as f64;
            d * d
        })
        .sum()
}

/// 暴力扫描 `vectors` 中的所有向量，返回与 `query` 距离最小的 k 个
///
/// 参数：
/// - query: 长度为 dim 的查询向量
/// - vectors: 按行拼接的若干 dim 维向量
/// - k: 返回的最近邻居数量
pub fn knn_l2(query: &[f32], vectors: &[f32], dim: usize, k: usize) -> Vec<Neighbor> {
    if k == 0 || dim == 0 || vectors.is_empty() {
        return vec![];
    }

    let scan = |(id, v): (usize, &[f32])| Neighbor { id, distance: squared_l2(query, v) };

    if vectors.len() / dim < PARALLEL_THRESHOLD {
        let mut topk = TopKNeighbors::new(k);
        topk.extend(vectors.chunks_exact(dim).enumerate().map(scan));
        return topk.into_sorted_vec();
    }

    vectors
        .par_chunks_exact(dim)
        .enumerate()
        .fold(
            || TopKNeighbors::new(k),
            |mut topk, item| {
                topk.push(scan(item));
                topk
            },
        )
        .reduce(|| TopKNeighbors::new(k), TopKNeighbors::merge)
        .into_sorted_vec()
}

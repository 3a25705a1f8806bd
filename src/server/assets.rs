//! Embedded web assets.

/// The search page served at `/`. Self-contained: inline styles and script,
/// no external assets beyond optional cover images.
pub const HOMEPAGE_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8"/>
  <meta name="viewport" content="width=device-width,initial-scale=1"/>
  <title>Book-Rec — Recommendations</title>
  <style>
    :root{
      --bg:#0f1724; --muted:#9aa4b2; --accent:#7c3aed;
      --glass:rgba(255,255,255,0.03);
    }
    *{box-sizing:border-box}
    html,body{height:100%;margin:0;font-family:Inter,ui-sans-serif,system-ui,-apple-system,"Segoe UI",Roboto,Arial;background:linear-gradient(180deg,#071029 0%,#0a1220 100%);color:#e6eef6}
    .container{max-width:1100px;margin:28px auto;padding:24px}
    header{display:flex;align-items:center;gap:16px;margin-bottom:18px}
    .logo{width:56px;height:56px;border-radius:10px;background:linear-gradient(135deg,var(--accent),#4f46e5);display:flex;align-items:center;justify-content:center;font-weight:700;color:white;font-size:20px}
    h1{margin:0;font-size:1.4rem}
    p.lead{margin:6px 0 0;color:var(--muted);font-size:0.95rem}
    .card{background:var(--glass);border:1px solid rgba(255,255,255,0.03);padding:18px;border-radius:12px}
    .search-row{display:flex;gap:12px;margin-top:18px;align-items:center}
    .search-input{flex:1;display:flex;align-items:center;gap:8px;border:1px solid rgba(255,255,255,0.06);padding:10px 12px;border-radius:10px}
    .search-input input{flex:1;background:transparent;border:0;color:inherit;outline:none;font-size:1rem}
    .btn{background:var(--accent);border:0;color:white;padding:10px 14px;border-radius:10px;font-weight:600;cursor:pointer}
    .chips{display:flex;gap:8px;flex-wrap:wrap;margin-top:12px}
    .chip{background:rgba(255,255,255,0.03);padding:6px 10px;border-radius:999px;cursor:pointer;color:var(--muted);font-size:0.9rem}
    .chip.active{background:linear-gradient(90deg,var(--accent),#5b21b6);color:white}
    .results{margin-top:18px;display:grid;grid-template-columns:repeat(auto-fill,minmax(260px,1fr));gap:14px}
    .result-card{background:rgba(255,255,255,0.02);border-radius:12px;padding:14px;border:1px solid rgba(255,255,255,0.03);display:flex;gap:12px;align-items:flex-start}
    .cover{width:70px;height:96px;border-radius:6px;background:linear-gradient(180deg,#1f2937,#111827);display:flex;align-items:center;justify-content:center;color:var(--muted);font-weight:700;object-fit:cover}
    .meta{flex:1}
    .title{font-weight:700;margin:0;font-size:1rem}
    .author{margin-top:6px;color:var(--muted);font-size:0.9rem}
    .desc{margin-top:8px;color:#cbd5e1;font-size:0.9rem;line-height:1.25}
    .meta-foot{display:flex;justify-content:space-between;align-items:center;margin-top:10px}
    .genres{color:var(--muted);font-size:0.85rem}
    .score{background:rgba(255,255,255,0.04);padding:6px 8px;border-radius:8px;font-weight:700}
    .empty{padding:32px;text-align:center;color:var(--muted)}
    footer{margin-top:18px;color:var(--muted);font-size:0.9rem;text-align:center}
    @media (max-width:640px){.search-row{flex-direction:column;align-items:stretch}}
  </style>
</head>
<body>
  <div class="container">
    <header>
      <div class="logo">BR</div>
      <div>
        <h1>Book-Rec</h1>
        <p class="lead">Semantic book recommendations — type a mood, genre, or book you liked.</p>
      </div>
    </header>

    <div class="card">
      <div class="search-row">
        <div class="search-input">
          <input id="q" placeholder="e.g. hard sci-fi with humor, or 'I liked Dune'"/>
        </div>
        <button class="btn" id="goBtn">Recommend</button>
      </div>
      <div class="chips">
        <div class="chip" data-q="Science Fiction">Science Fiction</div>
        <div class="chip" data-q="Fantasy">Fantasy</div>
        <div class="chip" data-q="Romance">Romance</div>
        <div class="chip" data-q="Dystopia">Dystopia</div>
        <div class="chip" data-q="Nonfiction">Nonfiction</div>
      </div>

      <div id="resultsWrap">
        <div class="empty" id="emptyState">Try a query above to see recommendations.</div>
        <div class="results" id="results" style="display:none"></div>
      </div>
    </div>

    <footer>Swap the catalog CSV or plug in a vector DB to scale.</footer>
  </div>

<script>
  const qInput = document.getElementById('q');
  const goBtn = document.getElementById('goBtn');
  const resultsEl = document.getElementById('results');
  const emptyEl = document.getElementById('emptyState');
  const chips = Array.from(document.querySelectorAll('.chip'));

  chips.forEach(c => {
    c.addEventListener('click', () => {
      if (c.classList.contains('active')) {
        c.classList.remove('active');
        qInput.value = '';
      } else {
        chips.forEach(x => x.classList.remove('active'));
        c.classList.add('active');
        qInput.value = c.dataset.q;
      }
      runRecommend();
    });
  });

  goBtn.addEventListener('click', runRecommend);
  qInput.addEventListener('keydown', (e) => { if (e.key === 'Enter') runRecommend(); });

  async function runRecommend() {
    const text = qInput.value.trim();
    if (!text) {
      emptyEl.textContent = "Please type a query or tap a genre chip.";
      resultsEl.style.display = 'none';
      emptyEl.style.display = 'block';
      return;
    }
    goBtn.disabled = true;
    try {
      const res = await fetch('/recommend', {
        method: 'POST',
        headers: {'Content-Type': 'application/json'},
        body: JSON.stringify({text, k: 8})
      });
      if (!res.ok) throw new Error('Server error');
      const data = await res.json();
      renderResults(data.results || []);
    } catch (err) {
      console.error(err);
      emptyEl.textContent = "Something went wrong — check the server logs.";
      resultsEl.style.display = 'none';
      emptyEl.style.display = 'block';
    } finally {
      goBtn.disabled = false;
    }
  }

  function renderResults(items) {
    resultsEl.innerHTML = '';
    if (!items || items.length === 0) {
      emptyEl.textContent = "No matches found. Try a broader query.";
      resultsEl.style.display = 'none';
      emptyEl.style.display = 'block';
      return;
    }
    emptyEl.style.display = 'none';
    resultsEl.style.display = 'grid';
    items.forEach(it => {
      const card = document.createElement('div'); card.className = 'result-card';
      let cover;
      if (it.cover) {
        cover = document.createElement('img');
        cover.className = 'cover';
        cover.src = it.cover;
        cover.alt = it.title;
      } else {
        cover = document.createElement('div');
        cover.className = 'cover';
        cover.textContent = (it.title || '').split(' ').slice(0, 2).map(s => s[0]).join('').toUpperCase();
      }
      const meta = document.createElement('div'); meta.className = 'meta';
      const title = document.createElement('div'); title.className = 'title'; title.textContent = it.title;
      const author = document.createElement('div'); author.className = 'author'; author.textContent = it.author;
      const desc = document.createElement('div'); desc.className = 'desc'; desc.textContent = it.description;
      const foot = document.createElement('div'); foot.className = 'meta-foot';
      const genres = document.createElement('div'); genres.className = 'genres'; genres.textContent = (it.genres || []).join(', ');
      const score = document.createElement('div'); score.className = 'score';
      score.textContent = (typeof it.score === 'number') ? Math.round(it.score * 100) + '%' : '';
      foot.appendChild(genres); foot.appendChild(score);
      meta.appendChild(title); meta.appendChild(author); meta.appendChild(desc); meta.appendChild(foot);
      card.appendChild(cover); card.appendChild(meta);
      resultsEl.appendChild(card);
    });
  }
</script>
</body>
</html>
"#;
